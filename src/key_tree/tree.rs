use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::task::{waker, ArcWake};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{KeyPath, Subscription};

/// A shared listener callback.
pub type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Identifies one registered listener, wherever it was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<P> {
    id: ListenerId,
    listener: Listener<P>,
    signal: Option<CancellationToken>,
}

impl<P> Entry<P> {
    fn expired(&self) -> bool {
        self.signal
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }
}

impl<P> Clone for Entry<P> {
    fn clone(&self) -> Self {
        Entry {
            id: self.id,
            listener: Arc::clone(&self.listener),
            signal: self.signal.clone(),
        }
    }
}

struct Node<P> {
    entries: Vec<Entry<P>>,
    children: HashMap<String, Node<P>>,
}

impl<P> Default for Node<P> {
    fn default() -> Self {
        Node {
            entries: Vec::new(),
            children: HashMap::new(),
        }
    }
}

impl<P> Node<P> {
    fn descend_mut(&mut self, segments: &[String]) -> &mut Node<P> {
        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.clone()).or_default();
        }
        node
    }

    fn descend(&self, segments: &[String]) -> Option<&Node<P>> {
        let mut node = self;
        for segment in segments {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Move the entries for `id` at `segments` into `out`; returns true when
    /// this node ends up empty and can be dropped by its parent.
    fn detach(&mut self, segments: &[String], id: ListenerId, out: &mut Vec<Entry<P>>) -> bool {
        match segments.split_first() {
            None => {
                let (gone, kept): (Vec<Entry<P>>, Vec<Entry<P>>) = mem::take(&mut self.entries)
                    .into_iter()
                    .partition(|entry| entry.id == id);
                self.entries = kept;
                out.extend(gone);
            }
            Some((head, rest)) => {
                if let Some(child) = self.children.get_mut(head) {
                    if child.detach(rest, id, out) {
                        self.children.remove(head);
                    }
                }
            }
        }
        self.entries.is_empty() && self.children.is_empty()
    }

    fn expired_ids(&self, out: &mut Vec<ListenerId>) {
        out.extend(
            self.entries
                .iter()
                .filter(|entry| entry.expired())
                .map(|entry| entry.id),
        );
        for child in self.children.values() {
            child.expired_ids(out);
        }
    }
}

struct TreeState<P> {
    root: Node<P>,
    index: HashMap<ListenerId, Vec<KeyPath>>,
    watches: HashMap<ListenerId, BoxFuture<'static, ()>>,
    next_id: u64,
}

/// What a removal took out of the tree: the listener's entries and its
/// signal watch. Drop it only after the tree lock is released; listener
/// closures may own handles that lock the tree again.
type Detached<P> = (Vec<Entry<P>>, Option<BoxFuture<'static, ()>>);

impl<P> TreeState<P> {
    fn remove(&mut self, id: ListenerId) -> Option<Detached<P>> {
        let paths = self.index.remove(&id)?;
        let mut entries = Vec::new();
        for path in paths {
            self.root.detach(path.segments(), id, &mut entries);
        }
        Some((entries, self.watches.remove(&id)))
    }
}

fn remove_from<P>(state: &Mutex<TreeState<P>>, id: ListenerId) -> Option<Detached<P>> {
    state.lock().unwrap_or_else(PoisonError::into_inner).remove(id)
}

/// Wakes when a listener's signal is cancelled and takes the listener out
/// of the tree on the cancelling thread.
struct SignalWatch<P> {
    state: Weak<Mutex<TreeState<P>>>,
    id: ListenerId,
}

impl<P: 'static> ArcWake for SignalWatch<P> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(state) = arc_self.state.upgrade() {
            let detached = remove_from(&state, arc_self.id);
            if detached.is_some() {
                trace!(listener = arc_self.id.0, "signal fired, listener removed");
            }
            drop(detached);
        }
    }
}

/// Trie of listeners keyed by [`KeyPath`].
///
/// Clones share the same tree.
pub struct KeyTree<P> {
    state: Arc<Mutex<TreeState<P>>>,
}

impl<P> Clone for KeyTree<P> {
    fn clone(&self) -> Self {
        KeyTree {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P> Default for KeyTree<P> {
    fn default() -> Self {
        KeyTree {
            state: Arc::new(Mutex::new(TreeState {
                root: Node::default(),
                index: HashMap::new(),
                watches: HashMap::new(),
                next_id: 1,
            })),
        }
    }
}

impl<P: 'static> fmt::Debug for KeyTree<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTree")
            .field("listeners", &self.lock().index.len())
            .finish()
    }
}

impl<P: 'static> KeyTree<P> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TreeState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `listener` at exactly `path`.
    pub fn insert<F>(&self, path: impl Into<KeyPath>, listener: F) -> ListenerId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.insert_with_signal(path, listener, None)
    }

    /// Register `listener` at `path`; cancelling `signal` removes it from the
    /// tree and releases the closure.
    pub fn insert_with_signal<F>(
        &self,
        path: impl Into<KeyPath>,
        listener: F,
        signal: Option<CancellationToken>,
    ) -> ListenerId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.insert_listener(vec![path.into()], Arc::new(listener), signal)
    }

    fn insert_listener(
        &self,
        paths: Vec<KeyPath>,
        listener: Listener<P>,
        signal: Option<CancellationToken>,
    ) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        for path in &paths {
            state.root.descend_mut(path.segments()).entries.push(Entry {
                id,
                listener: Arc::clone(&listener),
                signal: signal.clone(),
            });
        }
        state.index.insert(id, paths);
        drop(state);

        if let Some(signal) = signal {
            self.watch(id, signal);
        }
        id
    }

    /// Tie the lifetime of `id` to `signal`.
    ///
    /// The cancellation future is polled once with a waker that removes the
    /// listener; the future is then parked in the tree so its registration
    /// stays live until the listener goes away by either route.
    fn watch(&self, id: ListenerId, signal: CancellationToken) {
        let wake = waker(Arc::new(SignalWatch {
            state: Arc::downgrade(&self.state),
            id,
        }));
        let mut cancelled = signal.cancelled_owned().boxed();
        if let Poll::Ready(()) = cancelled.poll_unpin(&mut Context::from_waker(&wake)) {
            let detached = self.lock().remove(id);
            drop(detached);
            return;
        }

        let mut state = self.lock();
        if state.index.contains_key(&id) {
            state.watches.insert(id, cancelled);
        }
    }

    /// Attach an already registered listener to one more node.
    ///
    /// Returns false when `id` is unknown.
    pub fn attach(&self, id: ListenerId, path: impl Into<KeyPath>) -> bool {
        let path = path.into();
        let mut state = self.lock();
        let Some(existing) = state
            .index
            .get(&id)
            .and_then(|paths| paths.first())
            .and_then(|first| state.root.descend(first.segments()))
            .and_then(|node| node.entries.iter().find(|entry| entry.id == id))
            .cloned()
        else {
            return false;
        };

        let node = state.root.descend_mut(path.segments());
        if node.entries.iter().any(|entry| entry.id == id) {
            return true;
        }
        node.entries.push(existing);
        if let Some(paths) = state.index.get_mut(&id) {
            paths.push(path);
        }
        true
    }

    /// Register at `path` and return a handle that removes the listener.
    pub fn subscribe<F>(
        &self,
        path: impl Into<KeyPath>,
        listener: F,
        signal: Option<CancellationToken>,
    ) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = self.insert_with_signal(path, listener, signal);
        self.handle(id)
    }

    /// Register one listener at several nodes. A single emit delivers to it
    /// at most once even when several of its nodes lie on the emitted path.
    pub fn subscribe_many<I, K, F>(
        &self,
        paths: I,
        listener: F,
        signal: Option<CancellationToken>,
    ) -> Subscription
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyPath>,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let paths: Vec<KeyPath> = paths.into_iter().map(Into::into).collect();
        let id = self.insert_listener(paths, Arc::new(listener), signal);
        self.handle(id)
    }

    /// Build an unsubscribe handle for `id`.
    pub fn handle(&self, id: ListenerId) -> Subscription {
        let state: Weak<Mutex<TreeState<P>>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                let detached = remove_from(&state, id);
                drop(detached);
            }
        })
    }

    /// Remove a listener from every node it was attached to.
    pub fn remove(&self, id: ListenerId) -> bool {
        let detached = self.lock().remove(id);
        detached.is_some()
    }

    /// Deliver `payload` to every listener on every prefix of `path`, root
    /// to leaf. Returns how many listeners were invoked.
    ///
    /// Listeners run after the tree lock is released, so they may subscribe,
    /// unsubscribe or emit again.
    pub fn emit(&self, path: impl Into<KeyPath>, payload: &P) -> usize {
        let path = path.into();
        let (targets, expired) = {
            let state = self.lock();
            let mut seen = HashSet::new();
            let mut targets: Vec<Listener<P>> = Vec::new();
            let mut expired = Vec::new();

            let mut collect = |node: &Node<P>| {
                for entry in &node.entries {
                    if entry.expired() {
                        expired.push(entry.id);
                    } else if seen.insert(entry.id) {
                        targets.push(Arc::clone(&entry.listener));
                    }
                }
            };

            let mut node = &state.root;
            collect(node);
            for segment in path.segments() {
                match node.children.get(segment) {
                    Some(child) => {
                        node = child;
                        collect(node);
                    }
                    None => break,
                }
            }
            (targets, expired)
        };

        if !expired.is_empty() {
            let detached: Vec<Detached<P>> = {
                let mut state = self.lock();
                expired.into_iter().filter_map(|id| state.remove(id)).collect()
            };
            drop(detached);
        }

        trace!(path = %path, listeners = targets.len(), "emit");
        for listener in &targets {
            listener(payload);
        }
        targets.len()
    }

    /// Drop every listener whose signal has fired but which is still
    /// attached. Signals normally remove their listener on the spot, so this
    /// only finds stragglers.
    pub fn prune(&self) -> usize {
        let detached: Vec<Detached<P>> = {
            let mut state = self.lock();
            let mut expired = Vec::new();
            state.root.expired_ids(&mut expired);
            expired.sort_unstable_by_key(|id| id.0);
            expired.dedup();
            expired.into_iter().filter_map(|id| state.remove(id)).collect()
        };
        detached.len()
    }

    /// Number of distinct registered listeners.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of listeners registered exactly at `path`.
    pub fn listeners_at(&self, path: impl Into<KeyPath>) -> usize {
        let path = path.into();
        self.lock()
            .root
            .descend(path.segments())
            .map(|node| node.entries.len())
            .unwrap_or(0)
    }
}
