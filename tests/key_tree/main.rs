//! Integration tests for hierarchical routing and the weak registry.

#[path = "../support/mod.rs"]
mod support;

use reactive_cache::{CancellationToken, KeyPath, KeyTree, MemoryStore, Store, StoreEvent, WeakRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use support::Recorder;

#[test]
fn prefix_listener_receives_descendant_events() {
    let tree: KeyTree<u32> = KeyTree::new();
    let users = Recorder::<u32>::new();
    let user_42 = Recorder::<u32>::new();
    tree.insert(["update", "users"], users.listener());
    tree.insert(["update", "users", "42"], user_42.listener());

    tree.emit(["update", "users", "42"], &1);
    tree.emit(["update", "users", "43"], &2);

    assert_eq!(users.events(), vec![1, 2]);
    assert_eq!(user_42.events(), vec![1]);
}

#[test]
fn delivery_runs_root_to_leaf() {
    let tree: KeyTree<String> = KeyTree::new();
    let order = Recorder::<String>::new();
    for (label, path) in [("leaf", "a.b.c"), ("root", ""), ("mid", "a.b")] {
        let record = order.listener();
        tree.insert(KeyPath::parse(path), move |_: &String| record(&label.to_string()));
    }

    assert_eq!(tree.emit(KeyPath::parse("a.b.c.d"), &String::new()), 3);
    assert_eq!(order.events(), vec!["root", "mid", "leaf"]);
}

#[test]
fn store_paths_route_through_the_tree() {
    let store: MemoryStore<String> = MemoryStore::new("users");
    let everything = Recorder::<StoreEvent<String>>::new();
    let updates = Recorder::<StoreEvent<String>>::new();
    store.events().insert(KeyPath::root(), everything.listener());
    store.events().insert(["update", "users"], updates.listener());

    store.set("1", "ada".to_string());
    store.delete("1");

    assert_eq!(everything.len(), 2);
    assert_eq!(updates.len(), 1);
}

#[test]
fn subscribe_many_delivers_once_per_emit() {
    let tree: KeyTree<u32> = KeyTree::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = tree.subscribe_many(
        [KeyPath::parse("a"), KeyPath::parse("a.b")],
        move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        None,
    );

    tree.emit(["a", "b"], &0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sub.unsubscribe();
    tree.emit(["a", "b"], &0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tree.is_empty());
}

#[test]
fn cancelled_signal_removes_listener() {
    let tree: KeyTree<u32> = KeyTree::new();
    let seen = Recorder::<u32>::new();
    let signal = CancellationToken::new();
    tree.subscribe(["k"], seen.listener(), Some(signal.clone()));
    tree.subscribe(["other"], |_: &u32| {}, Some(signal.clone()));

    tree.emit(["k"], &1);
    signal.cancel();
    tree.emit(["k"], &2);

    assert_eq!(seen.events(), vec![1]);
    assert!(tree.is_empty());
    assert_eq!(tree.prune(), 0);
}

#[test]
fn cancelled_signal_releases_captured_state() {
    let tree: KeyTree<u32> = KeyTree::new();
    let signal = CancellationToken::new();
    let owned = Arc::new(AtomicUsize::new(0));
    let captured = Arc::clone(&owned);
    tree.subscribe(
        ["a"],
        move |_: &u32| {
            captured.fetch_add(1, Ordering::SeqCst);
        },
        Some(signal.clone()),
    );
    assert_eq!(Arc::strong_count(&owned), 2);

    signal.cancel();
    assert_eq!(tree.len(), 0);
    assert_eq!(Arc::strong_count(&owned), 1);
}

#[test]
fn dropping_handle_keeps_listener() {
    let tree: KeyTree<u32> = KeyTree::new();
    let seen = Recorder::<u32>::new();
    drop(tree.subscribe(["k"], seen.listener(), None));
    tree.emit(["k"], &5);
    assert_eq!(seen.events(), vec![5]);
}

#[test]
fn registry_shares_identity_while_referenced() {
    let registry: WeakRegistry<String, String> = WeakRegistry::new();
    let calls = AtomicUsize::new(0);
    let factory = |key: &String| {
        calls.fetch_add(1, Ordering::SeqCst);
        Arc::new(format!("value for {}", key))
    };

    let first = registry.get_or_create("k".to_string(), factory);
    let second = registry.get_or_create("k".to_string(), factory);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(first);
    drop(second);
    let third = registry.get_or_create("k".to_string(), factory);
    assert_eq!(*third, "value for k");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn store_subscription_by_id() {
    let store: MemoryStore<u32> = MemoryStore::new("counters");
    let seen = Recorder::<StoreEvent<u32>>::new();
    let sub = store.subscribe(Some("a"), Arc::new(seen.listener()), None);

    store.set("a", 1);
    store.set("b", 1);
    sub.unsubscribe();
    store.set("a", 2);

    assert_eq!(
        seen.events(),
        vec![StoreEvent::Updated {
            id: "a".into(),
            old: None,
            new: 1
        }]
    );
}
