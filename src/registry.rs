//! WeakRegistry - identity-preserving lazy cache.
//!
//! `get_or_create` hands out the same `Arc<R>` for a key for as long as
//! anything else holds a strong reference to it. The registry itself only
//! keeps a `Weak`, so once every owner lets go the entry is collected and
//! the next call builds a fresh instance. Listeners attached to the old
//! instance are orphaned with it.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

const MIN_SWEEP: usize = 32;

struct Entries<K, R> {
    map: HashMap<K, Weak<R>>,
    // Dead entries are swept once the map reaches this size.
    sweep_at: usize,
}

impl<K: Eq + Hash, R> Entries<K, R> {
    fn sweep_if_due(&mut self) {
        if self.map.len() < self.sweep_at {
            return;
        }
        self.map.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP);
    }
}

pub struct WeakRegistry<K, R> {
    entries: Mutex<Entries<K, R>>,
}

impl<K, R> Default for WeakRegistry<K, R> {
    fn default() -> Self {
        WeakRegistry {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                sweep_at: MIN_SWEEP,
            }),
        }
    }
}

impl<K, R> fmt::Debug for WeakRegistry<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry").finish_non_exhaustive()
    }
}

impl<K, R> WeakRegistry<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries<K, R>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live instance for `key`, building one with `factory` when
    /// none is alive.
    ///
    /// The factory runs without the registry lock held, so it may itself use
    /// the registry. If another caller installs an instance for the same key
    /// while the factory runs, that instance wins and the new one is dropped.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> Arc<R>
    where
        F: FnOnce(&K) -> Arc<R>,
    {
        if let Some(live) = self.get(&key) {
            return live;
        }

        let created = factory(&key);

        let mut entries = self.lock();
        if let Some(live) = entries.map.get(&key).and_then(Weak::upgrade) {
            return live;
        }
        entries.sweep_if_due();
        entries.map.insert(key.clone(), Arc::downgrade(&created));
        trace!(key = ?key, "registry entry created");
        created
    }

    /// The live instance for `key`, without creating one.
    pub fn get(&self, key: &K) -> Option<Arc<R>> {
        self.lock().map.get(key).and_then(Weak::upgrade)
    }

    /// Forget `key` even if its instance is still alive elsewhere.
    pub fn evict(&self, key: &K) -> Option<Arc<R>> {
        self.lock().map.remove(key).and_then(|weak| weak.upgrade())
    }

    /// Keys whose instances are still alive.
    pub fn keys(&self) -> Vec<K> {
        self.lock()
            .map
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.lock()
            .map
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
