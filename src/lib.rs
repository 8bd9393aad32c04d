mod cache;
mod entity;
mod error;
mod key_tree;
mod query;
mod registry;
mod store;

pub use cache::{Cache, CacheOptions};
pub use entity::{composite_id, Entity, Extractor, Item, List, Record};
pub use error::CacheError;
pub use key_tree::{KeyPath, KeyTree, Listener, ListenerId, Subscription};
pub use query::{
    CompletionHook, Query, QueryEvent, QueryId, QueryManager, QueryRef, QueryState, QueryStatus,
    RefreshStrategy,
};
pub use registry::WeakRegistry;
pub use store::{
    notify_delete, notify_set, DehydratedEntry, DehydratedStore, MemoryStore, Store, StoreEvent,
    DELETE, UPDATE,
};

// Re-export the derive macro so `#[derive(Record)]` works with one import
pub use reactive_cache_macros::Record;

// Re-exported for custom `Store` backends and fetchers watching cancellation
pub use tokio_util::sync::CancellationToken;
