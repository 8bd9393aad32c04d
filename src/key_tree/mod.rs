//! Hierarchical event routing.
//!
//! Listeners are indexed in a trie over path segments. Emitting on a path
//! delivers to every listener registered on any prefix of that path, root
//! first:
//!
//! ```text
//!   root ── update ── users ── 42      emit(update.users.42) reaches
//!                        │              listeners at root, update,
//!                        └──── 43       update.users and update.users.42,
//!                                       never update.users.43
//! ```

mod path;
mod subscription;
mod tree;

pub use path::KeyPath;
pub use subscription::Subscription;
pub use tree::{KeyTree, Listener, ListenerId};
