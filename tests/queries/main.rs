//! Integration tests for queries, query refs and the query manager.

#[path = "../support/mod.rs"]
mod support;

use futures::channel::oneshot;
use futures::executor::block_on;
use reactive_cache::{
    CacheError, KeyPath, Query, QueryEvent, QueryManager, QueryRef, QueryState, QueryStatus,
    RefreshStrategy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{init_tracing, Recorder};

#[test]
fn keep_returns_same_query_without_fetching() {
    init_tracing();
    let manager: QueryManager<String> = QueryManager::new();
    let fetches = AtomicUsize::new(0);
    let fetch = |_: &KeyPath| {
        fetches.fetch_add(1, Ordering::SeqCst);
        Query::new()
    };

    let first = manager.refresh(["users", "1"], fetch, RefreshStrategy::Keep);
    let second = manager.refresh(["users", "1"], fetch, RefreshStrategy::Keep);

    assert!(first.ptr_eq(&second));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn replace_cancels_previous_exactly_once_before_install() {
    let manager: QueryManager<u32> = QueryManager::new();
    let first = manager.refresh(["k"], |_| Query::new(), RefreshStrategy::Keep);

    let cancels = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cancels);
    let observer = manager.query_ref(["k"]);
    first.subscribe(move |state: &QueryState<u32>| {
        if let QueryState::Failed(CacheError::Cancelled) = state {
            counter.fetch_add(1, Ordering::SeqCst);
            // Nothing is current yet: the replacement is installed afterwards.
            assert!(observer.current().map(|q| q.is_pending()) != Some(true));
        }
    });

    let second = manager.refresh(["k"], |_| Query::new(), RefreshStrategy::Replace);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert!(second.is_pending());
    assert!(manager.query_ref(["k"]).current().unwrap().ptr_eq(&second));

    second.cancel();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn events_follow_transition_order() {
    let manager: QueryManager<u32> = QueryManager::new();
    let events = Recorder::<QueryEvent<u32>>::new();
    manager.subscribe(["k"], events.listener(), None);

    let first = manager.refresh(["k"], |_| Query::new(), RefreshStrategy::Keep);
    let second = manager.refresh(["k"], |_| Query::new(), RefreshStrategy::Replace);
    first.complete(1);
    second.complete(2);

    assert_eq!(
        events.events(),
        vec![
            QueryEvent::Pending(first.id()),
            QueryEvent::Pending(second.id()),
            QueryEvent::Completed(2),
        ]
    );
    assert_eq!(first.late_settles(), 1);
}

#[test]
fn read_started_before_replace_settles_with_its_own_query() {
    let query_ref: QueryRef<&'static str> = QueryRef::new();
    query_ref.refresh(Query::new, RefreshStrategy::Keep);
    let stale = query_ref.next_result();

    let fresh = query_ref.refresh(Query::new, RefreshStrategy::Replace);
    let current = query_ref.next_result();
    fresh.complete("fresh");

    assert_eq!(block_on(stale), Err(CacheError::Cancelled));
    assert_eq!(block_on(current), Ok("fresh"));
}

#[test]
fn idle_manager_read_fails_with_idle() {
    let manager: QueryManager<u32> = QueryManager::new();
    let query_ref = manager.query_ref(["nothing"]);
    assert_eq!(query_ref.status(), None);
    assert_eq!(block_on(query_ref.read()), Err(CacheError::Idle));
}

#[test]
fn prefix_listener_sees_nested_keys_only() {
    let manager: QueryManager<u32> = QueryManager::new();
    let users = Recorder::<QueryEvent<u32>>::new();
    let one_user = Recorder::<QueryEvent<u32>>::new();
    manager.subscribe(["users"], users.listener(), None);
    manager.subscribe(KeyPath::parse("users.42"), one_user.listener(), None);

    manager.refresh(["users", "42"], |_| Query::resolve(42), RefreshStrategy::Keep);
    manager.refresh(["users", "43"], |_| Query::resolve(43), RefreshStrategy::Keep);

    assert_eq!(users.len(), 4);
    assert_eq!(one_user.len(), 2);
    assert_eq!(one_user.events()[1], QueryEvent::Completed(42));
}

#[test]
fn subscription_signal_stops_delivery() {
    let manager: QueryManager<u32> = QueryManager::new();
    let events = Recorder::<QueryEvent<u32>>::new();
    let signal = reactive_cache::CancellationToken::new();
    manager.subscribe(["k"], events.listener(), Some(signal.clone()));

    manager.refresh(["k"], |_| Query::resolve(1), RefreshStrategy::Keep);
    signal.cancel();
    manager.refresh(["k"], |_| Query::resolve(2), RefreshStrategy::Keep);

    assert_eq!(events.len(), 2);
    assert!(manager.events().is_empty());
}

#[tokio::test]
async fn from_future_query_settles_on_runtime() {
    let manager: QueryManager<u32> = QueryManager::new();
    let (sender, receiver) = oneshot::channel::<u32>();

    let query = manager.refresh(
        ["remote"],
        |_| {
            let (query, driver) = Query::from_future(receiver);
            tokio::spawn(driver);
            query
        },
        RefreshStrategy::Keep,
    );
    assert_eq!(query.status(), QueryStatus::Pending);

    sender.send(9).unwrap();
    assert_eq!(manager.query_ref(["remote"]).next_result().await, Ok(9));
}

#[tokio::test]
async fn replaced_fetch_observes_its_signal() {
    let manager: QueryManager<u32> = QueryManager::new();
    let observed = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&observed);
    let slow = manager.refresh(
        ["search"],
        move |_| {
            let query = Query::new();
            let signal = query.signal();
            tokio::spawn(async move {
                signal.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
            });
            query
        },
        RefreshStrategy::Keep,
    );

    let fast = manager.refresh(["search"], |_| Query::resolve(2), RefreshStrategy::Replace);

    tokio::time::timeout(Duration::from_secs(5), async {
        while observed.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(slow.error(), Some(CacheError::Cancelled));
    assert_eq!(fast.data(), Some(2));
}
