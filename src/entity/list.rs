use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Entity;
use crate::error::CacheError;
use crate::key_tree::Subscription;
use crate::query::{CompletionHook, Query, QueryEvent, QueryRef, QueryStatus, RefreshStrategy};
use crate::store::StoreEvent;

pub(crate) struct ListInner<T> {
    key: String,
    entity: Entity<T>,
    ids: RwLock<Vec<String>>,
    absorbing: AtomicBool,
    query: QueryRef<Vec<T>>,
    watch: Subscription,
}

impl<T: Clone + Send + Sync + 'static> ListInner<T> {
    pub(crate) fn new(entity: Entity<T>, key: String) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ListInner<T>>| {
            let owner = weak.clone();
            let hook: CompletionHook<Vec<T>> = Arc::new(move |members: &Vec<T>| {
                if let Some(list) = owner.upgrade() {
                    list.absorb(members);
                }
            });
            let query = QueryRef::attached(
                entity.list_path(&key),
                entity.list_events().clone(),
                Some(hook),
            );

            let owner = weak.clone();
            let watch = entity.store().subscribe(
                None,
                Arc::new(move |event: &StoreEvent<T>| {
                    if let Some(list) = owner.upgrade() {
                        list.member_changed(event.id());
                    }
                }),
                None,
            );

            trace!(entity = %entity.name(), list = %key, "list created");
            ListInner {
                key,
                entity,
                ids: RwLock::new(Vec::new()),
                absorbing: AtomicBool::new(false),
                query,
                watch,
            }
        })
    }

    /// Record a fetched page: every member goes to the store, the list
    /// keeps only their ids.
    fn absorb(&self, members: &[T]) {
        let store = self.entity.store();
        self.absorbing.store(true, Ordering::SeqCst);
        let ids: Vec<String> = members
            .iter()
            .map(|member| {
                let id = self.entity.id_of(member);
                store.set(&id, member.clone());
                id
            })
            .collect();
        self.absorbing.store(false, Ordering::SeqCst);

        debug!(entity = %self.entity.name(), list = %self.key, members = ids.len(), "list members recorded");
        *self.ids.write().unwrap_or_else(PoisonError::into_inner) = ids;
    }

    fn member_changed(&self, id: &str) {
        if self.absorbing.load(Ordering::SeqCst) || !self.contains(id) {
            return;
        }
        let data = self.materialize();
        trace!(entity = %self.entity.name(), list = %self.key, member = %id, "list member changed");
        self.entity
            .list_events()
            .emit(self.entity.list_path(&self.key), &QueryEvent::Updated(data));
    }

    fn ids(&self) -> Vec<String> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn contains(&self, id: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|member| member == id)
    }

    /// Current store values of the members, in list order. Members missing
    /// from the store are skipped.
    fn materialize(&self) -> Vec<T> {
        let store = self.entity.store();
        self.ids()
            .iter()
            .filter_map(|id| store.get(id))
            .collect()
    }
}

impl<T> Drop for ListInner<T> {
    fn drop(&mut self) {
        self.watch.unsubscribe();
    }
}

/// Live view of an ordered set of records under one key.
///
/// The list stores ids only. Every read materializes the members from the
/// store, and any update or delete of a member publishes
/// `QueryEvent::Updated` with the fresh array, without refetching.
pub struct List<T> {
    inner: Arc<ListInner<T>>,
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        List {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("entity", &self.inner.entity)
            .field("key", &self.inner.key)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> List<T> {
    pub(crate) fn from_inner(inner: Arc<ListInner<T>>) -> Self {
        List { inner }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn entity(&self) -> &Entity<T> {
        &self.inner.entity
    }

    pub fn ptr_eq(&self, other: &List<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.ids()
    }

    pub fn data(&self) -> Vec<T> {
        self.inner.materialize()
    }

    pub fn len(&self) -> usize {
        self.inner.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains(id)
    }

    pub fn query(&self) -> &QueryRef<Vec<T>> {
        &self.inner.query
    }

    pub fn status(&self) -> Option<QueryStatus> {
        self.inner.query.status()
    }

    /// Fetch the members. The list stays alive while the fetch is in flight.
    pub fn refresh<F>(&self, fetcher: F, strategy: RefreshStrategy) -> Query<Vec<T>>
    where
        F: FnOnce(&str) -> Query<Vec<T>>,
    {
        let query = self
            .inner
            .query
            .refresh(|| fetcher(&self.inner.key), strategy);
        query.retain(Arc::clone(&self.inner));
        query
    }

    /// Materialized members once the current fetch has completed; waits for
    /// a pending one. Fails with `Idle` before the first fetch.
    pub fn read(&self) -> BoxFuture<'static, Result<Vec<T>, CacheError>> {
        let Some(query) = self.inner.query.current() else {
            return future::ready(Err(CacheError::Idle)).boxed();
        };
        if query.status() == QueryStatus::Completed {
            return future::ready(Ok(self.data())).boxed();
        }
        let list = Arc::clone(&self.inner);
        async move {
            query.result().await?;
            Ok(list.materialize())
        }
        .boxed()
    }

    pub fn cancel(&self) -> bool {
        self.inner.query.cancel()
    }

    /// Fetch lifecycle plus `Updated` whenever a member changes.
    pub fn subscribe<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&QueryEvent<Vec<T>>) + Send + Sync + 'static,
    {
        self.inner.query.subscribe(listener, signal)
    }
}
