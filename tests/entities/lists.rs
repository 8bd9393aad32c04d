use futures::executor::block_on;
use reactive_cache::{Cache, CacheError, Query, QueryEvent, RefreshStrategy};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::support::{Recorder, User};

fn page() -> Vec<User> {
    vec![User::new(1, "ada"), User::new(2, "grace")]
}

#[test]
fn list_reflects_member_update_without_refetch() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let list = users.list("team");
    let fetches = AtomicUsize::new(0);

    list.refresh(
        |_| {
            fetches.fetch_add(1, Ordering::SeqCst);
            Query::resolve(page())
        },
        RefreshStrategy::Keep,
    );
    assert_eq!(list.ids(), vec!["1".to_string(), "2".to_string()]);

    users.item("1").set(User::new(1, "ada lovelace"));

    assert_eq!(
        block_on(list.read()),
        Ok(vec![User::new(1, "ada lovelace"), User::new(2, "grace")])
    );
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn list_publishes_updated_for_members_only() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let list = users.list("team");
    list.refresh(|_| Query::resolve(page()), RefreshStrategy::Keep);

    let events = Recorder::<QueryEvent<Vec<User>>>::new();
    list.subscribe(events.listener(), None);

    users.put(User::new(3, "linus"));
    users.item("2").delete();

    assert_eq!(
        events.events(),
        vec![QueryEvent::Updated(vec![User::new(1, "ada")])]
    );
    assert!(!list.contains("3"));
    assert_eq!(list.ids().len(), 2);
}

#[test]
fn lists_share_members_through_the_store() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let everyone = users.list("all");
    let admins = users.list("admins");
    everyone.refresh(|_| Query::resolve(page()), RefreshStrategy::Keep);
    admins.refresh(|_| Query::resolve(vec![User::new(2, "grace")]), RefreshStrategy::Keep);

    let admin_events = Recorder::<QueryEvent<Vec<User>>>::new();
    admins.subscribe(admin_events.listener(), None);

    everyone.refresh(
        |_| Query::resolve(vec![User::new(1, "ada"), User::new(2, "grace hopper")]),
        RefreshStrategy::Keep,
    );

    assert_eq!(admins.data(), vec![User::new(2, "grace hopper")]);
    assert_eq!(
        admin_events.events(),
        vec![QueryEvent::Updated(vec![User::new(2, "grace hopper")])]
    );
}

#[test]
fn on_lists_sees_every_key() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let events = Recorder::<QueryEvent<Vec<User>>>::new();
    users.on_lists(events.listener(), None);

    users.query_list("a", |_| Query::resolve(vec![User::new(1, "ada")]));
    users.query_list("b", |_| Query::reject(CacheError::fetch("offline")));

    let completed = events
        .events()
        .into_iter()
        .filter(|event| !matches!(event, QueryEvent::Pending(_)))
        .collect::<Vec<_>>();
    assert_eq!(
        completed,
        vec![
            QueryEvent::Completed(vec![User::new(1, "ada")]),
            QueryEvent::Failed(CacheError::Fetch("offline".into())),
        ]
    );
}

#[test]
fn list_identity_is_shared_while_held() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let a = users.list("team");
    let b = users.list("team");
    assert!(a.ptr_eq(&b));
    assert!(users.cached_list("other").is_none());
}

#[test]
fn cancelled_list_fetch_fails_read() {
    let cache = Cache::default();
    let users = cache.records::<User>().unwrap();
    let list = users.list("team");
    list.refresh(|_| Query::new(), RefreshStrategy::Keep);
    let read = list.read();

    assert!(list.cancel());
    assert_eq!(block_on(read), Err(CacheError::Cancelled));
    assert!(list.is_empty());
}
