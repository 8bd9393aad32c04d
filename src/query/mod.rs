//! Queries and the refresh-strategy state machine.
//!
//! - [`Query`]: one fetch attempt, `pending -> completed | failed`.
//! - [`QueryRef`]: binds a key to its current query and decides, per
//!   [`RefreshStrategy`], whether a refresh keeps or replaces a pending one.
//! - [`QueryManager`]: lazily creates one `QueryRef` per [`KeyPath`] and
//!   publishes their lifecycle through a shared key tree.
//!
//! [`KeyPath`]: crate::KeyPath

mod manager;
#[allow(clippy::module_inception)]
mod query;
mod query_ref;
mod strategy;

pub use manager::QueryManager;
pub use query::{Query, QueryId, QueryState, QueryStatus};
pub use query_ref::{CompletionHook, QueryEvent, QueryRef};
pub use strategy::RefreshStrategy;
