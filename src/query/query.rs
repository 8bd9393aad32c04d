use std::any::Any;
use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, Either, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::key_tree::Subscription;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    fn next() -> Self {
        QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    Pending,
    Completed(T),
    Failed(CacheError),
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        match self {
            QueryState::Pending => QueryStatus::Pending,
            QueryState::Completed(_) => QueryStatus::Completed,
            QueryState::Failed(_) => QueryStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryState::Pending)
    }
}

impl<T: Clone> QueryState<T> {
    /// The terminal result, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, CacheError>> {
        match self {
            QueryState::Pending => None,
            QueryState::Completed(data) => Some(Ok(data.clone())),
            QueryState::Failed(err) => Some(Err(err.clone())),
        }
    }
}

type SettleListener<T> = Box<dyn FnOnce(&QueryState<T>) + Send>;

struct Slot<T> {
    state: QueryState<T>,
    listeners: Vec<(u64, SettleListener<T>)>,
    waiters: Vec<oneshot::Sender<Result<T, CacheError>>>,
    retained: Vec<Box<dyn Any + Send + Sync>>,
    next_listener: u64,
    late_settles: usize,
}

struct QueryInner<T> {
    id: QueryId,
    token: CancellationToken,
    slot: Mutex<Slot<T>>,
}

/// One fetch attempt: `pending` until it settles as `completed` or
/// `failed`, after which it never changes again.
///
/// Clones share the same attempt.
pub struct Query<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Query<T> {
    pub fn id(&self) -> QueryId {
        self.inner.id
    }

    /// Token the fetch operation should watch; it fires when the query is
    /// cancelled. Cancelling the returned token does not cancel the query.
    pub fn signal(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// True when both handles refer to the same attempt.
    pub fn ptr_eq(&self, other: &Query<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> QueryStatus {
        self.lock().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == QueryStatus::Pending
    }

    /// How many settle attempts arrived after the query was already terminal.
    pub fn late_settles(&self) -> usize {
        self.lock().late_settles
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Query {
            inner: Arc::new(QueryInner {
                id: QueryId::next(),
                token: CancellationToken::new(),
                slot: Mutex::new(Slot {
                    state: QueryState::Pending,
                    listeners: Vec::new(),
                    waiters: Vec::new(),
                    retained: Vec::new(),
                    next_listener: 1,
                    late_settles: 0,
                }),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Query<T> {
    /// A pending query settled by hand through `complete` / `fail`.
    pub fn new() -> Self {
        Self::default()
    }

    /// An already completed query.
    pub fn resolve(data: T) -> Self {
        let query = Self::new();
        query.complete(data);
        query
    }

    /// An already failed query.
    pub fn reject(err: CacheError) -> Self {
        let query = Self::new();
        query.fail(err);
        query
    }

    /// Wrap a fetch future. The returned driver must be polled (spawned) for
    /// the query to settle; it stops polling the fetch once the query is
    /// cancelled.
    pub fn from_future<F, E>(fetch: F) -> (Self, impl Future<Output = ()> + Send + 'static)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        let query = Self::new();
        let handle = query.clone();
        let signal = query.signal();
        let driver = async move {
            let cancelled = signal.cancelled();
            futures::pin_mut!(fetch);
            futures::pin_mut!(cancelled);
            match future::select(fetch, cancelled).await {
                Either::Left((Ok(data), _)) => {
                    handle.complete(data);
                }
                Either::Left((Err(err), _)) => {
                    handle.fail(CacheError::fetch(err));
                }
                Either::Right(_) => {
                    trace!(query = %handle.id(), "fetch dropped after cancel");
                }
            }
        };
        (query, driver)
    }

    /// Wrap a fetch future and drive it on the current tokio runtime.
    #[cfg(feature = "tokio")]
    pub fn spawn<F, E>(fetch: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        let (query, driver) = Self::from_future(fetch);
        tokio::spawn(driver);
        query
    }

    pub fn state(&self) -> QueryState<T> {
        self.lock().state.clone()
    }

    pub fn data(&self) -> Option<T> {
        match &self.lock().state {
            QueryState::Completed(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<CacheError> {
        match &self.lock().state {
            QueryState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// pending -> completed. Returns false (and changes nothing observable)
    /// when the query is already terminal.
    pub fn complete(&self, data: T) -> bool {
        self.settle(QueryState::Completed(data))
    }

    /// pending -> failed. Same terminal guard as `complete`.
    pub fn fail(&self, err: CacheError) -> bool {
        self.settle(QueryState::Failed(err))
    }

    /// Fail a pending query with `Cancelled` and fire its signal. Later
    /// `complete` / `fail` calls from the detached fetch are ignored.
    pub fn cancel(&self) -> bool {
        let cancelled = self.settle(QueryState::Failed(CacheError::Cancelled));
        if cancelled {
            self.inner.token.cancel();
        }
        cancelled
    }

    fn settle(&self, next: QueryState<T>) -> bool {
        let (listeners, waiters, retained) = {
            let mut slot = self.lock();
            if slot.state.is_terminal() {
                slot.late_settles += 1;
                trace!(
                    query = %self.inner.id,
                    attempted = ?next.status(),
                    current = ?slot.state.status(),
                    "late settle ignored"
                );
                return false;
            }
            slot.state = next.clone();
            (
                mem::take(&mut slot.listeners),
                mem::take(&mut slot.waiters),
                mem::take(&mut slot.retained),
            )
        };

        debug!(query = %self.inner.id, status = ?next.status(), "query settled");

        // Listeners run before waiters wake so awaiting consumers observe
        // whatever the listeners wrote.
        for (_, listener) in listeners {
            listener(&next);
        }
        if let Some(result) = next.result() {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        drop(retained);
        true
    }

    /// Register for the single terminal transition. Nothing is registered if
    /// the query is already terminal.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnOnce(&QueryState<T>) + Send + 'static,
    {
        let key = {
            let mut slot = self.lock();
            if slot.state.is_terminal() {
                return Subscription::noop();
            }
            let key = slot.next_listener;
            slot.next_listener += 1;
            slot.listeners.push((key, Box::new(listener)));
            key
        };

        let inner: Weak<QueryInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .retain(|(k, _)| *k != key);
            }
        })
    }

    /// Like `subscribe`, but runs `listener` immediately when the query has
    /// already settled.
    pub fn on_settled<F>(&self, listener: F) -> Subscription
    where
        F: FnOnce(&QueryState<T>) + Send + 'static,
    {
        let settled = {
            let slot = self.lock();
            slot.state.is_terminal().then(|| slot.state.clone())
        };
        match settled {
            Some(state) => {
                listener(&state);
                Subscription::noop()
            }
            None => self.subscribe(listener),
        }
    }

    /// Keep `value` alive until the query settles.
    pub fn retain<V: Any + Send + Sync>(&self, value: V) {
        let mut slot = self.lock();
        if !slot.state.is_terminal() {
            slot.retained.push(Box::new(value));
        }
    }

    /// Future of the terminal result of this exact attempt.
    ///
    /// The future is bound to this query when created; it never follows a
    /// replacement query.
    pub fn result(&self) -> BoxFuture<'static, Result<T, CacheError>> {
        let receiver = {
            let mut slot = self.lock();
            if let Some(result) = slot.state.result() {
                return future::ready(result).boxed();
            }
            let (sender, receiver) = oneshot::channel();
            slot.waiters.push(sender);
            receiver
        };
        async move { receiver.await.unwrap_or(Err(CacheError::Cancelled)) }.boxed()
    }
}
