use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Query, QueryId, QueryState, QueryStatus, RefreshStrategy};
use crate::error::CacheError;
use crate::key_tree::{KeyPath, KeyTree, Subscription};

/// Lifecycle events published for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent<D> {
    /// A new query became current.
    Pending(QueryId),
    /// The current query completed.
    Completed(D),
    /// The current query failed or was cancelled.
    Failed(CacheError),
    /// The owner's value changed without a fetch (list members updated).
    Updated(D),
}

impl<D> QueryEvent<D> {
    pub fn data(&self) -> Option<&D> {
        match self {
            QueryEvent::Completed(data) | QueryEvent::Updated(data) => Some(data),
            _ => None,
        }
    }
}

/// Runs on completion, before `Completed` is published.
pub type CompletionHook<D> = Arc<dyn Fn(&D) + Send + Sync>;

struct RefSlot<D> {
    current: Option<Query<D>>,
    watch: Option<Subscription>,
    strategy: Option<RefreshStrategy>,
}

pub(crate) struct RefInner<D> {
    path: KeyPath,
    events: KeyTree<QueryEvent<D>>,
    on_completed: Option<CompletionHook<D>>,
    slot: Mutex<RefSlot<D>>,
}

impl<D> RefInner<D> {
    fn lock(&self) -> MutexGuard<'_, RefSlot<D>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: Clone + Send + Sync + 'static> RefInner<D> {
    pub(crate) fn new(
        path: KeyPath,
        events: KeyTree<QueryEvent<D>>,
        on_completed: Option<CompletionHook<D>>,
    ) -> Self {
        RefInner {
            path,
            events,
            on_completed,
            slot: Mutex::new(RefSlot {
                current: None,
                watch: None,
                strategy: None,
            }),
        }
    }

    fn settled(&self, id: QueryId, state: &QueryState<D>) {
        let is_current = self.lock().current.as_ref().map(Query::id) == Some(id);
        if !is_current {
            trace!(path = %self.path, query = %id, "stale query settled");
            return;
        }
        match state {
            QueryState::Completed(data) => {
                if let Some(hook) = &self.on_completed {
                    hook(data);
                }
                self.events
                    .emit(&self.path, &QueryEvent::Completed(data.clone()));
            }
            QueryState::Failed(err) => {
                self.events.emit(&self.path, &QueryEvent::Failed(err.clone()));
            }
            QueryState::Pending => {}
        }
    }
}

/// Binds one key to its current (or most recent) query.
///
/// States: idle (no query yet) -> pending -> completed | failed, with
/// `refresh` re-entering pending. At most one query is current at a time.
pub struct QueryRef<D> {
    inner: Arc<RefInner<D>>,
}

impl<D> Clone for QueryRef<D> {
    fn clone(&self) -> Self {
        QueryRef {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> fmt::Debug for QueryRef<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.lock();
        f.debug_struct("QueryRef")
            .field("path", &self.inner.path)
            .field("current", &slot.current)
            .finish()
    }
}

impl<D: Clone + Send + Sync + 'static> Default for QueryRef<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Send + Sync + 'static> QueryRef<D> {
    /// A standalone ref publishing on its own tree at the root path.
    pub fn new() -> Self {
        Self::attached(KeyPath::root(), KeyTree::new(), None)
    }

    /// A ref publishing at `path` on a shared tree. `on_completed` runs
    /// before `Completed` is published for the current query.
    pub fn attached(
        path: KeyPath,
        events: KeyTree<QueryEvent<D>>,
        on_completed: Option<CompletionHook<D>>,
    ) -> Self {
        Self::from_inner(Arc::new(RefInner::new(path, events, on_completed)))
    }

    pub(crate) fn from_inner(inner: Arc<RefInner<D>>) -> Self {
        QueryRef { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<RefInner<D>> {
        &self.inner
    }

    pub fn path(&self) -> &KeyPath {
        &self.inner.path
    }

    pub fn events(&self) -> &KeyTree<QueryEvent<D>> {
        &self.inner.events
    }

    /// Start a fetch, subject to `strategy` when a query is still pending.
    ///
    /// - no current query, or current is terminal: `fetcher` runs and its
    ///   query becomes current; `Pending` is published immediately.
    /// - current pending, `Keep`: the pending query is returned and
    ///   `fetcher` is not invoked.
    /// - current pending, `Replace`: the pending query is unsubscribed and
    ///   cancelled before the new one is installed.
    pub fn refresh<F>(&self, fetcher: F, strategy: RefreshStrategy) -> Query<D>
    where
        F: FnOnce() -> Query<D>,
    {
        let (watch, stale) = {
            let mut slot = self.inner.lock();
            slot.strategy = Some(strategy);
            let pending = slot.current.as_ref().filter(|q| q.is_pending()).cloned();
            match (pending, strategy) {
                (Some(current), RefreshStrategy::Keep) => {
                    debug!(path = %self.inner.path, query = %current.id(), "refresh kept pending query");
                    return current;
                }
                (Some(_), RefreshStrategy::Replace) => (slot.watch.take(), slot.current.take()),
                (None, _) => (slot.watch.take(), None),
            }
        };

        if let Some(watch) = watch {
            watch.unsubscribe();
        }
        if let Some(stale) = stale {
            stale.cancel();
            debug!(path = %self.inner.path, query = %stale.id(), "refresh replaced pending query");
        }

        let query = fetcher();
        let id = query.id();
        self.inner.lock().current = Some(query.clone());
        debug!(path = %self.inner.path, query = %id, strategy = %strategy, "refresh started query");
        self.inner.events.emit(&self.inner.path, &QueryEvent::Pending(id));

        // The watch keeps this ref alive until the query settles.
        let owner = Arc::clone(&self.inner);
        let watch = query.on_settled(move |state| owner.settled(id, state));
        let orphaned = {
            let mut slot = self.inner.lock();
            if slot.current.as_ref().map(Query::id) == Some(id) {
                slot.watch = Some(watch);
                None
            } else {
                Some(watch)
            }
        };
        if let Some(watch) = orphaned {
            watch.unsubscribe();
        }
        query
    }

    /// Cancel the current query if it is pending. Safe on an idle ref.
    pub fn cancel(&self) -> bool {
        match self.current() {
            Some(query) => query.cancel(),
            None => false,
        }
    }

    pub fn current(&self) -> Option<Query<D>> {
        self.inner.lock().current.clone()
    }

    /// `None` while idle.
    pub fn status(&self) -> Option<QueryStatus> {
        self.current().map(|query| query.status())
    }

    /// Strategy used by the most recent `refresh`.
    pub fn last_strategy(&self) -> Option<RefreshStrategy> {
        self.inner.lock().strategy
    }

    /// Data of the current query when it has completed.
    pub fn data(&self) -> Option<D> {
        self.current().and_then(|query| query.data())
    }

    /// Result of the query that is current at call time. A later replace
    /// does not rebind the returned future. Fails with `Idle` when no query
    /// was ever started.
    pub fn next_result(&self) -> BoxFuture<'static, Result<D, CacheError>> {
        match self.current() {
            Some(query) => query.result(),
            None => future::ready(Err(CacheError::Idle)).boxed(),
        }
    }

    /// Current data if completed, otherwise waits like `next_result`.
    pub fn read(&self) -> BoxFuture<'static, Result<D, CacheError>> {
        match self.data() {
            Some(data) => future::ready(Ok(data)).boxed(),
            None => self.next_result(),
        }
    }

    /// Listen to this key's lifecycle events.
    pub fn subscribe<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&QueryEvent<D>) + Send + Sync + 'static,
    {
        self.inner
            .events
            .subscribe(&self.inner.path, listener, signal)
    }
}
