//! Integration tests for entities, items and lists over the shared cache.

#[path = "../support/mod.rs"]
mod support;

mod lists;

use futures::executor::block_on;
use reactive_cache::{
    Cache, CacheError, CacheOptions, Query, QueryEvent, QueryStatus, Record, RefreshStrategy,
    StoreEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use support::{init_tracing, Membership, Recorder, TestRecord, User};

#[test]
fn query_item_resolves_into_item_data() {
    init_tracing();
    let cache = Cache::default();
    let entity = cache.records::<TestRecord>().unwrap();
    assert_eq!(entity.name(), "Test");

    let query = entity.query_item("x", |_| Query::resolve(TestRecord::new("x", 1)));
    assert_eq!(block_on(query.result()), Ok(TestRecord::new("x", 1)));

    let item = entity.item("x");
    assert_eq!(item.data(), Some(TestRecord::new("x", 1)));
    assert_eq!(block_on(item.read()), Ok(TestRecord::new("x", 1)));
}

#[test]
fn keep_does_not_refetch_pending_item() {
    let cache = Cache::default();
    let entity = cache.records::<TestRecord>().unwrap();
    let fetches = AtomicUsize::new(0);
    let fetch = |_: &str| {
        fetches.fetch_add(1, Ordering::SeqCst);
        Query::new()
    };

    let first = entity.query_item("x", fetch);
    let second = entity.item("x").refresh(fetch, RefreshStrategy::Keep);

    assert!(first.ptr_eq(&second));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    first.complete(TestRecord::new("x", 2));
    assert_eq!(entity.get("x"), Some(TestRecord::new("x", 2)));
}

#[test]
fn replace_default_strategy_cancels_pending_item_fetch() {
    let cache = Cache::new(CacheOptions {
        default_strategy: RefreshStrategy::Replace,
    });
    let entity = cache.records::<TestRecord>().unwrap();

    let first = entity.query_item("x", |_| Query::new());
    let second = entity.query_item("x", |_| Query::new());

    assert_eq!(first.error(), Some(CacheError::Cancelled));
    second.complete(TestRecord::new("x", 3));
    assert_eq!(entity.item("x").data(), Some(TestRecord::new("x", 3)));
}

#[test]
fn item_identity_is_shared_while_held() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    assert_eq!(users.name(), "users");

    let a = users.item("1");
    let b = users.item("1");
    assert!(a.ptr_eq(&b));

    drop(a);
    drop(b);
    assert!(users.cached_item("1").is_none());
}

#[test]
fn failed_fetch_leaves_store_untouched() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let events = Recorder::<QueryEvent<User>>::new();
    users.on_items(events.listener(), None);

    let query = users.query_item("9", |_| Query::reject(CacheError::fetch("404")));

    assert_eq!(query.status(), QueryStatus::Failed);
    assert_eq!(users.get("9"), None);
    assert_eq!(
        events.events(),
        vec![
            QueryEvent::Pending(query.id()),
            QueryEvent::Failed(CacheError::Fetch("404".into())),
        ]
    );
}

#[test]
fn item_events_arrive_after_store_write() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let probe = users.clone();
    let observed = Recorder::<Option<User>>::new();
    let record = observed.listener();
    users.on_items(
        move |event: &QueryEvent<User>| {
            if let QueryEvent::Completed(user) = event {
                record(&probe.get(&user.id.to_string()));
            }
        },
        None,
    );

    users.query_item("1", |_| Query::resolve(User::new(1, "ada")));
    assert_eq!(observed.events(), vec![Some(User::new(1, "ada"))]);
}

#[test]
fn merge_mutation_requires_cached_value() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let writes = Recorder::<StoreEvent<User>>::new();
    users.subscribe(None, writes.listener(), None);

    let rename = |user: &User, name: &String| User {
        name: name.clone(),
        ..user.clone()
    };

    let rejected = users.merge_mutation("1", Query::resolve("grace".to_string()), rename);
    assert_eq!(
        block_on(rejected.result()),
        Err(CacheError::UnknownMutatedItem {
            entity: "users".into(),
            id: "1".into()
        })
    );
    assert_eq!(writes.len(), 0);

    users.put(User::new(1, "ada"));
    let merged = users.merge_mutation("1", Query::resolve("grace".to_string()), rename);
    assert_eq!(block_on(merged.result()), Ok(User::new(1, "grace")));
    assert_eq!(users.item("1").data(), Some(User::new(1, "grace")));
}

#[test]
fn deletion_removes_and_notifies() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    users.put(User::new(1, "ada"));
    let item = users.item("1");
    let events = Recorder::<StoreEvent<User>>::new();
    item.subscribe(events.listener(), None);

    let removed = users.deletion("1", Query::resolve(()));

    assert_eq!(removed.data(), Some(Some(User::new(1, "ada"))));
    assert_eq!(item.data(), None);
    assert_eq!(
        events.events(),
        vec![StoreEvent::Deleted {
            id: "1".into(),
            removed: User::new(1, "ada")
        }]
    );
}

#[test]
fn composite_ids_are_json_arrays() {
    let cache = Cache::default();
    let memberships = cache.records::<Membership>().unwrap();
    let membership = Membership {
        org: "acme".into(),
        user: 7,
        role: "admin".into(),
    };
    assert_eq!(membership.id(), r#"["acme",7]"#);

    memberships.put(membership.clone());
    assert_eq!(memberships.get(r#"["acme",7]"#), Some(membership));
}

#[test]
fn dehydrated_cache_warms_another() {
    let warm = Cache::default();
    let users = warm.records::<User>().unwrap();
    users.put(User::new(1, "ada"));
    users.put(User::new(2, "grace"));
    let json = users.dehydrate().unwrap().to_json().unwrap();

    let cold = Cache::default();
    let restored = cold.records::<User>().unwrap();
    let snapshot = reactive_cache::DehydratedStore::from_json(&json).unwrap();
    assert_eq!(restored.hydrate(&snapshot).unwrap(), 2);
    assert_eq!(restored.item("2").data(), Some(User::new(2, "grace")));
}

#[test]
fn cancelled_mutation_discards_late_result() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let source: Query<User> = Query::new();
    let signal = source.signal();
    let mutation = users.mutation("1", source.clone());

    mutation.cancel();
    assert!(signal.is_cancelled());
    assert!(!source.complete(User::new(1, "late")));
    assert_eq!(users.get("1"), None);
}

#[tokio::test]
async fn when_present_waits_for_async_fetch() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let item = users.item("5");
    let present = item.when_present();

    let (query, driver) = Query::from_future(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, String>(User::new(5, "lin"))
    });
    item.refresh(|_| query, RefreshStrategy::Keep);
    tokio::spawn(driver);

    assert_eq!(present.await, Ok(User::new(5, "lin")));
    assert_eq!(item.status(), Some(QueryStatus::Completed));
}

#[tokio::test]
async fn cancelled_fetch_is_abandoned() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let item = users.item("6");
    let (query, driver) = Query::from_future(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, String>(User::new(6, "never"))
    });
    let query = item.refresh(|_| query, RefreshStrategy::Keep);
    let task = tokio::spawn(driver);

    assert!(item.cancel());
    task.await.unwrap();
    assert_eq!(query.error(), Some(CacheError::Cancelled));
    assert_eq!(item.data(), None);
}
