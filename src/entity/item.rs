use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Entity;
use crate::error::CacheError;
use crate::key_tree::Subscription;
use crate::query::{CompletionHook, Query, QueryEvent, QueryRef, QueryStatus, RefreshStrategy};
use crate::store::StoreEvent;

pub(crate) struct ItemInner<T> {
    id: String,
    entity: Entity<T>,
    query: QueryRef<T>,
}

impl<T: Clone + Send + Sync + 'static> ItemInner<T> {
    pub(crate) fn new(entity: Entity<T>, id: String) -> Self {
        let store = Arc::clone(entity.store());
        let key = id.clone();
        let hook: CompletionHook<T> = Arc::new(move |data: &T| {
            store.set(&key, data.clone());
        });
        let query = QueryRef::attached(
            entity.item_path(&id),
            entity.item_events().clone(),
            Some(hook),
        );
        trace!(entity = %entity.name(), id = %id, "item created");
        ItemInner { id, entity, query }
    }
}

/// Live view of one record. Never holds a copy: `data` reads the store.
pub struct Item<T> {
    inner: Arc<ItemInner<T>>,
}

impl<T> Clone for Item<T> {
    fn clone(&self) -> Self {
        Item {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("entity", &self.inner.entity)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Item<T> {
    pub(crate) fn from_inner(inner: Arc<ItemInner<T>>) -> Self {
        Item { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn entity(&self) -> &Entity<T> {
        &self.inner.entity
    }

    /// True when both handles are the same live item.
    pub fn ptr_eq(&self, other: &Item<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn data(&self) -> Option<T> {
        self.inner.entity.get(&self.inner.id)
    }

    pub fn query(&self) -> &QueryRef<T> {
        &self.inner.query
    }

    pub fn status(&self) -> Option<QueryStatus> {
        self.inner.query.status()
    }

    /// Fetch this item. On completion the result is written to the store
    /// before `Completed` is published. The item stays alive while the
    /// fetch is in flight.
    pub fn refresh<F>(&self, fetcher: F, strategy: RefreshStrategy) -> Query<T>
    where
        F: FnOnce(&str) -> Query<T>,
    {
        let query = self
            .inner
            .query
            .refresh(|| fetcher(&self.inner.id), strategy);
        query.retain(Arc::clone(&self.inner));
        query
    }

    /// Cached data, or the result of the fetch in flight. Fails with
    /// `Idle` when neither exists.
    pub fn read(&self) -> BoxFuture<'static, Result<T, CacheError>> {
        if let Some(data) = self.data() {
            return future::ready(Ok(data)).boxed();
        }
        match self.inner.query.current() {
            Some(query) if query.is_pending() => query.result(),
            _ => future::ready(Err(CacheError::Idle)).boxed(),
        }
    }

    /// Resolves with the first value the store holds for this id, now or
    /// later. Fails with `Cancelled` if the store goes away first.
    ///
    /// The store listener is removed as soon as a value is delivered, on
    /// the immediate path, or when the returned future is dropped.
    pub fn when_present(&self) -> BoxFuture<'static, Result<T, CacheError>> {
        let store = self.inner.entity.store();
        let signal = CancellationToken::new();
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let done = signal.clone();
        let subscription = store.subscribe(
            Some(self.inner.id.as_str()),
            Arc::new(move |event: &StoreEvent<T>| {
                let Some(value) = event.current() else {
                    return;
                };
                let sender = sender.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(value.clone());
                }
                done.cancel();
            }),
            Some(signal.clone()),
        );

        if let Some(value) = store.get(&self.inner.id) {
            subscription.unsubscribe();
            signal.cancel();
            return future::ready(Ok(value)).boxed();
        }

        let guard = signal.drop_guard();
        async move {
            let value = receiver.await.map_err(|_| CacheError::Cancelled);
            subscription.unsubscribe();
            drop(guard);
            value
        }
        .boxed()
    }

    /// Write `value` to the store; returns the previous value.
    pub fn set(&self, value: T) -> Option<T> {
        self.inner.entity.store().set(&self.inner.id, value)
    }

    /// Remove this id from the store; returns the removed value.
    pub fn delete(&self) -> Option<T> {
        self.inner.entity.store().delete(&self.inner.id)
    }

    /// Cancel the fetch in flight, if any.
    pub fn cancel(&self) -> bool {
        self.inner.query.cancel()
    }

    /// Store updates and deletes of this id.
    pub fn subscribe<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&StoreEvent<T>) + Send + Sync + 'static,
    {
        self.inner
            .entity
            .subscribe(Some(self.inner.id.as_str()), listener, signal)
    }

    /// Fetch lifecycle of this item.
    pub fn on_query<F>(&self, listener: F, signal: Option<CancellationToken>) -> Subscription
    where
        F: Fn(&QueryEvent<T>) + Send + Sync + 'static,
    {
        self.inner.query.subscribe(listener, signal)
    }
}
