use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::item::{Item, ItemInner};
use super::list::{List, ListInner};
use crate::error::CacheError;
use crate::key_tree::{KeyPath, KeyTree, Subscription};
use crate::query::{Query, QueryEvent, QueryState, RefreshStrategy};
use crate::registry::WeakRegistry;
use crate::store::{DehydratedStore, Store, StoreEvent};

/// Maps a record to its store key.
pub type Extractor<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub(crate) struct EntityInner<T> {
    name: String,
    store: Arc<dyn Store<T>>,
    extract: Extractor<T>,
    strategy: RefreshStrategy,
    items: WeakRegistry<String, ItemInner<T>>,
    lists: WeakRegistry<String, ListInner<T>>,
    item_events: KeyTree<QueryEvent<T>>,
    list_events: KeyTree<QueryEvent<Vec<T>>>,
}

/// A named collection of records sharing one store and one id rule.
///
/// Clones share the same items, lists and event trees. Item query events
/// are published at `<name>.<id>`, list query events at `<name>.<key>` on
/// separate trees.
pub struct Entity<T> {
    inner: Arc<EntityInner<T>>,
}

impl<T> Clone for Entity<T> {
    fn clone(&self) -> Self {
        Entity {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.inner.name)
            .field("strategy", &self.inner.strategy)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Entity<T> {
    pub fn new<F>(name: impl Into<String>, store: Arc<dyn Store<T>>, extract: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self::with_strategy(name, store, extract, RefreshStrategy::default())
    }

    /// Like `new`, with the strategy used by `query_item` / `query_list`.
    pub fn with_strategy<F>(
        name: impl Into<String>,
        store: Arc<dyn Store<T>>,
        extract: F,
        strategy: RefreshStrategy,
    ) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Entity {
            inner: Arc::new(EntityInner {
                name: name.into(),
                store,
                extract: Arc::new(extract),
                strategy,
                items: WeakRegistry::new(),
                lists: WeakRegistry::new(),
                item_events: KeyTree::new(),
                list_events: KeyTree::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn store(&self) -> &Arc<dyn Store<T>> {
        &self.inner.store
    }

    pub fn strategy(&self) -> RefreshStrategy {
        self.inner.strategy
    }

    pub fn extractor(&self) -> &Extractor<T> {
        &self.inner.extract
    }

    pub fn id_of(&self, value: &T) -> String {
        (self.inner.extract)(value)
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.store.get(id)
    }

    /// Write `value` under its extracted id; returns the previous value.
    pub fn put(&self, value: T) -> Option<T> {
        let id = self.id_of(&value);
        self.inner.store.set(&id, value)
    }

    /// The live item for `id`, created if none is held.
    pub fn item(&self, id: impl Into<String>) -> Item<T> {
        let entity = self.clone();
        let inner = self
            .inner
            .items
            .get_or_create(id.into(), |id| Arc::new(ItemInner::new(entity, id.clone())));
        Item::from_inner(inner)
    }

    pub fn cached_item(&self, id: &str) -> Option<Item<T>> {
        self.inner.items.get(&id.to_string()).map(Item::from_inner)
    }

    /// The live list for `key`, created if none is held.
    pub fn list(&self, key: impl Into<String>) -> List<T> {
        let entity = self.clone();
        let inner = self
            .inner
            .lists
            .get_or_create(key.into(), |key| ListInner::new(entity, key.clone()));
        List::from_inner(inner)
    }

    pub fn cached_list(&self, key: &str) -> Option<List<T>> {
        self.inner.lists.get(&key.to_string()).map(List::from_inner)
    }

    /// Refresh the item for `id` with the entity's default strategy.
    pub fn query_item<F>(&self, id: impl Into<String>, fetcher: F) -> Query<T>
    where
        F: FnOnce(&str) -> Query<T>,
    {
        self.item(id).refresh(fetcher, self.inner.strategy)
    }

    /// Refresh the list for `key` with the entity's default strategy.
    pub fn query_list<F>(&self, key: impl Into<String>, fetcher: F) -> Query<Vec<T>>
    where
        F: FnOnce(&str) -> Query<Vec<T>>,
    {
        self.list(key).refresh(fetcher, self.inner.strategy)
    }

    /// Store the result of `source` under `id` once it completes,
    /// replacing any cached value.
    ///
    /// The returned query settles after the write. Cancelling it cancels
    /// `source`.
    pub fn mutation(&self, id: impl Into<String>, source: Query<T>) -> Query<T> {
        let id = id.into();
        let store = Arc::clone(&self.inner.store);
        chain(source, move |data, result| {
            store.set(&id, data.clone());
            result.complete(data);
        })
    }

    /// Merge the result of `source` into the cached value for `id`.
    ///
    /// Fails with `UnknownMutatedItem`, writing nothing, when `id` has no
    /// cached value at completion time.
    pub fn merge_mutation<R, M>(&self, id: impl Into<String>, source: Query<R>, merge: M) -> Query<T>
    where
        R: Clone + Send + 'static,
        M: FnOnce(&T, &R) -> T + Send + 'static,
    {
        let id = id.into();
        let entity = self.inner.name.clone();
        let store = Arc::clone(&self.inner.store);
        chain(source, move |patch, result| match store.get(&id) {
            Some(current) => {
                let merged = merge(&current, &patch);
                store.set(&id, merged.clone());
                result.complete(merged);
            }
            None => {
                warn!(entity = %entity, id = %id, "merge mutation on uncached item rejected");
                result.fail(CacheError::UnknownMutatedItem { entity, id });
            }
        })
    }

    /// Remove `id` from the store once `source` completes. Resolves to the
    /// removed value, `None` when nothing was cached.
    pub fn deletion<R>(&self, id: impl Into<String>, source: Query<R>) -> Query<Option<T>>
    where
        R: Clone + Send + 'static,
    {
        let id = id.into();
        let store = Arc::clone(&self.inner.store);
        chain(source, move |_, result| {
            let removed = store.delete(&id);
            result.complete(removed);
        })
    }

    /// Store events for one id, or for every id when `id` is `None`.
    pub fn subscribe<F>(&self, id: Option<&str>, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&StoreEvent<T>) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(id, Arc::new(listener), signal)
    }

    /// Query lifecycle of every item.
    pub fn on_items<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&QueryEvent<T>) + Send + Sync + 'static,
    {
        self.inner
            .item_events
            .subscribe(KeyPath::new([self.name()]), listener, signal)
    }

    /// Query lifecycle and member updates of every list.
    pub fn on_lists<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&QueryEvent<Vec<T>>) + Send + Sync + 'static,
    {
        self.inner
            .list_events
            .subscribe(KeyPath::new([self.name()]), listener, signal)
    }

    pub fn dehydrate(&self) -> Result<DehydratedStore, CacheError>
    where
        T: Serialize,
    {
        DehydratedStore::capture(self.inner.store.as_ref())
    }

    pub fn hydrate(&self, snapshot: &DehydratedStore) -> Result<usize, CacheError>
    where
        T: DeserializeOwned,
    {
        let restored = snapshot.restore(self.inner.store.as_ref())?;
        debug!(entity = %self.inner.name, restored, "entity hydrated");
        Ok(restored)
    }

    pub(crate) fn item_path(&self, id: &str) -> KeyPath {
        KeyPath::new([self.name(), id])
    }

    pub(crate) fn list_path(&self, key: &str) -> KeyPath {
        KeyPath::new([self.name(), key])
    }

    pub(crate) fn item_events(&self) -> &KeyTree<QueryEvent<T>> {
        &self.inner.item_events
    }

    pub(crate) fn list_events(&self) -> &KeyTree<QueryEvent<Vec<T>>> {
        &self.inner.list_events
    }
}

/// A query that settles through `settle` once `source` completes, fails
/// with `source`, and cancels `source` when it is cancelled itself.
fn chain<R, U, F>(source: Query<R>, settle: F) -> Query<U>
where
    R: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: FnOnce(R, &Query<U>) + Send + 'static,
{
    let result = Query::new();

    let upstream = source.clone();
    result.subscribe(move |state: &QueryState<U>| {
        if matches!(state, QueryState::Failed(err) if err.is_cancelled()) {
            upstream.cancel();
        }
    });

    let downstream = result.clone();
    source.on_settled(move |state| match state {
        QueryState::Completed(data) => settle(data.clone(), &downstream),
        QueryState::Failed(err) => {
            downstream.fail(err.clone());
        }
        QueryState::Pending => {}
    });
    result
}
