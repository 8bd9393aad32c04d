//! Store - keyed value cache for one entity.
//!
//! The store is the single source of truth for cached values. Backends
//! publish on their event tree with paths
//!
//! ```text
//! update.<entity>.<id>   StoreEvent::Updated { id, old, new }
//! delete.<entity>.<id>   StoreEvent::Deleted { id, removed }
//! ```
//!
//! so a listener at `update.<entity>` sees every write to that entity.

mod dehydrate;
mod memory;

use tokio_util::sync::CancellationToken;

use crate::key_tree::{KeyPath, KeyTree, Listener, Subscription};

pub use dehydrate::{DehydratedEntry, DehydratedStore};
pub use memory::MemoryStore;

/// First path segment of update events.
pub const UPDATE: &str = "update";
/// First path segment of delete events.
pub const DELETE: &str = "delete";

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent<D> {
    Updated { id: String, old: Option<D>, new: D },
    Deleted { id: String, removed: D },
}

impl<D> StoreEvent<D> {
    pub fn id(&self) -> &str {
        match self {
            StoreEvent::Updated { id, .. } | StoreEvent::Deleted { id, .. } => id,
        }
    }

    /// The value after the event, `None` for deletes.
    pub fn current(&self) -> Option<&D> {
        match self {
            StoreEvent::Updated { new, .. } => Some(new),
            StoreEvent::Deleted { .. } => None,
        }
    }

    pub fn update_path(entity: &str, id: &str) -> KeyPath {
        KeyPath::new([UPDATE, entity, id])
    }

    pub fn delete_path(entity: &str, id: &str) -> KeyPath {
        KeyPath::new([DELETE, entity, id])
    }
}

/// Backend contract. Reads never fail: a missing id is `None`.
pub trait Store<D>: Send + Sync {
    /// Entity name; the second segment of every event path.
    fn name(&self) -> &str;

    fn get(&self, id: &str) -> Option<D>;

    /// Write `data`, returning the previous value. Emits `Updated` unless
    /// the stored value is unchanged.
    fn set(&self, id: &str, data: D) -> Option<D>;

    /// Remove `id`, returning the removed value. Emits `Deleted` only when
    /// something was removed.
    fn delete(&self, id: &str) -> Option<D>;

    fn ids(&self) -> Vec<String>;

    fn events(&self) -> &KeyTree<StoreEvent<D>>;

    /// Listen to updates and deletes of one id, or of the whole entity when
    /// `id` is `None`.
    fn subscribe(
        &self,
        id: Option<&str>,
        listener: Listener<StoreEvent<D>>,
        signal: Option<CancellationToken>,
    ) -> Subscription
    where
        D: 'static,
    {
        let paths = match id {
            Some(id) => [
                StoreEvent::<D>::update_path(self.name(), id),
                StoreEvent::<D>::delete_path(self.name(), id),
            ],
            None => [
                KeyPath::new([UPDATE, self.name()]),
                KeyPath::new([DELETE, self.name()]),
            ],
        };
        self.events()
            .subscribe_many(paths, move |event: &StoreEvent<D>| listener(event), signal)
    }
}

/// Publish what `Store::set` must emit. Backends call this after writing.
pub fn notify_set<D: Clone + PartialEq + 'static>(
    events: &KeyTree<StoreEvent<D>>,
    entity: &str,
    id: &str,
    old: Option<D>,
    new: &D,
) -> bool {
    if old.as_ref() == Some(new) {
        return false;
    }
    events.emit(
        StoreEvent::<D>::update_path(entity, id),
        &StoreEvent::Updated {
            id: id.to_string(),
            old,
            new: new.clone(),
        },
    );
    true
}

/// Publish what `Store::delete` must emit.
pub fn notify_delete<D: 'static>(events: &KeyTree<StoreEvent<D>>, entity: &str, id: &str, removed: D) {
    events.emit(
        StoreEvent::<D>::delete_path(entity, id),
        &StoreEvent::Deleted {
            id: id.to_string(),
            removed,
        },
    );
}
