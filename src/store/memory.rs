//! MemoryStore - HashMap-backed store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use super::{notify_delete, notify_set, DehydratedStore, Store, StoreEvent};
use crate::error::CacheError;
use crate::key_tree::KeyTree;

/// In-memory store backed by a HashMap. Clone-friendly via Arc; clones
/// share values and listeners.
pub struct MemoryStore<D> {
    name: Arc<str>,
    entries: Arc<RwLock<HashMap<String, D>>>,
    events: KeyTree<StoreEvent<D>>,
}

impl<D> Clone for MemoryStore<D> {
    fn clone(&self) -> Self {
        MemoryStore {
            name: Arc::clone(&self.name),
            entries: Arc::clone(&self.entries),
            events: self.events.clone(),
        }
    }
}

impl<D> fmt::Debug for MemoryStore<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("len", &len)
            .finish()
    }
}

impl<D: Clone + PartialEq + Send + Sync + 'static> MemoryStore<D> {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryStore {
            name: Arc::from(name.into()),
            entries: Arc::new(RwLock::new(HashMap::new())),
            events: KeyTree::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dehydrate(&self) -> Result<DehydratedStore, CacheError>
    where
        D: Serialize,
    {
        DehydratedStore::capture(self)
    }

    /// Write a snapshot back through `set`; returns how many entries landed.
    pub fn hydrate(&self, snapshot: &DehydratedStore) -> Result<usize, CacheError>
    where
        D: DeserializeOwned,
    {
        snapshot.restore(self)
    }
}

impl<D: Clone + PartialEq + Send + Sync + 'static> Store<D> for MemoryStore<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: &str) -> Option<D> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn set(&self, id: &str, data: D) -> Option<D> {
        let old = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), data.clone());

        if notify_set(&self.events, &self.name, id, old.clone(), &data) {
            debug!(entity = %self.name, id, "store updated");
        } else {
            trace!(entity = %self.name, id, "store set with unchanged value");
        }
        old
    }

    fn delete(&self, id: &str) -> Option<D> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        if let Some(removed) = &removed {
            debug!(entity = %self.name, id, "store deleted");
            notify_delete(&self.events, &self.name, id, removed.clone());
        }
        removed
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn events(&self) -> &KeyTree<StoreEvent<D>> {
        &self.events
    }
}
