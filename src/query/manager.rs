use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::query_ref::RefInner;
use super::{Query, QueryEvent, QueryRef, RefreshStrategy};
use crate::key_tree::{KeyPath, KeyTree, Subscription};
use crate::registry::WeakRegistry;

/// One [`QueryRef`] per key, created on demand and held weakly.
///
/// A ref stays registered while a caller holds it or while its current
/// query is in flight. Every ref publishes on the manager's shared tree at
/// its own key, so subscribing at a prefix (`users`) observes every nested
/// key (`users.42`, `users.43`).
pub struct QueryManager<D> {
    refs: WeakRegistry<KeyPath, RefInner<D>>,
    events: KeyTree<QueryEvent<D>>,
}

impl<D: 'static> fmt::Debug for QueryManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryManager")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl<D: Clone + Send + Sync + 'static> Default for QueryManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Send + Sync + 'static> QueryManager<D> {
    pub fn new() -> Self {
        QueryManager {
            refs: WeakRegistry::new(),
            events: KeyTree::new(),
        }
    }

    pub fn events(&self) -> &KeyTree<QueryEvent<D>> {
        &self.events
    }

    /// The ref for `key`, created if none is alive.
    pub fn query_ref(&self, key: impl Into<KeyPath>) -> QueryRef<D> {
        let events = self.events.clone();
        let inner = self.refs.get_or_create(key.into(), |path| {
            Arc::new(RefInner::new(path.clone(), events, None))
        });
        QueryRef::from_inner(inner)
    }

    /// The live ref for `key`, without creating one.
    pub fn get(&self, key: impl Into<KeyPath>) -> Option<QueryRef<D>> {
        self.refs.get(&key.into()).map(QueryRef::from_inner)
    }

    /// `QueryRef::refresh` on the ref for `key`.
    pub fn refresh<F>(&self, key: impl Into<KeyPath>, fetcher: F, strategy: RefreshStrategy) -> Query<D>
    where
        F: FnOnce(&KeyPath) -> Query<D>,
    {
        let query_ref = self.query_ref(key);
        let path = query_ref.path().clone();
        query_ref.refresh(|| fetcher(&path), strategy)
    }

    /// Cancel the pending query for `key`, if any.
    pub fn cancel(&self, key: impl Into<KeyPath>) -> bool {
        self.get(key).map(|query_ref| query_ref.cancel()).unwrap_or(false)
    }

    /// Listen at `key` and everything nested under it.
    pub fn subscribe<F>(
        &self,
        key: impl Into<KeyPath>,
        listener: F,
        signal: Option<CancellationToken>,
    ) -> Subscription
    where
        F: Fn(&QueryEvent<D>) + Send + Sync + 'static,
    {
        self.events.subscribe(key, listener, signal)
    }

    /// Keys whose refs are alive.
    pub fn keys(&self) -> Vec<KeyPath> {
        self.refs.keys()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
