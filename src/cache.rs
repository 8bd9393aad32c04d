//! Cache - the application-owned root.
//!
//! Nothing in this crate is global. The application builds one `Cache` at
//! startup and passes it (or the entities it hands out) to whatever needs
//! cached data.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{Entity, Record};
use crate::error::CacheError;
use crate::query::RefreshStrategy;
use crate::store::{MemoryStore, Store};

/// Cache-wide settings.
///
/// ```ignore
/// let options = CacheOptions::from_json(r#"{ "default_strategy": "replace" }"#)?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Strategy used by `Entity::query_item` and `Entity::query_list`.
    pub default_strategy: RefreshStrategy,
}

impl CacheOptions {
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(json)?)
    }
}

type AnyStore = Arc<dyn Any + Send + Sync>;

/// Owns one in-memory store per entity name.
#[derive(Default)]
pub struct Cache {
    options: CacheOptions,
    stores: Mutex<HashMap<String, AnyStore>>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Cache")
            .field("options", &self.options)
            .field("stores", &names)
            .finish()
    }
}

impl Cache {
    pub fn new(options: CacheOptions) -> Self {
        Cache {
            options,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The memory store for `name`, created on first use.
    ///
    /// Fails with `StoreTypeMismatch` when `name` already holds values of
    /// another type.
    pub fn store<T>(&self, name: &str) -> Result<Arc<MemoryStore<T>>, CacheError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let store = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(entity = %name, "store created");
                Arc::new(MemoryStore::<T>::new(name)) as AnyStore
            })
            .clone();
        store
            .downcast::<MemoryStore<T>>()
            .map_err(|_| CacheError::StoreTypeMismatch {
                entity: name.to_string(),
            })
    }

    /// An entity over the shared memory store for `name`.
    ///
    /// Every entity built for the same name sees the same values. Items and
    /// lists are shared per returned `Entity` and its clones.
    pub fn entity<T, F>(&self, name: &str, extract: F) -> Result<Entity<T>, CacheError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let store: Arc<dyn Store<T>> = self.store::<T>(name)?;
        Ok(self.entity_with_store(name, store, extract))
    }

    /// An entity over a caller-supplied backend.
    pub fn entity_with_store<T, F>(&self, name: &str, store: Arc<dyn Store<T>>, extract: F) -> Entity<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Entity::with_strategy(name, store, extract, self.options.default_strategy)
    }

    /// The entity for a [`Record`] type, keyed by its derived id.
    pub fn records<R: Record>(&self) -> Result<Entity<R>, CacheError> {
        self.entity(R::ENTITY, R::id)
    }

    /// Names of the stores created so far.
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
