//! Entities - named record collections over a [`Store`].
//!
//! An [`Entity`] owns the id rule and the store for one kind of record and
//! hands out two kinds of live views:
//!
//! - [`Item`]: one id. Its data is always read from the store.
//! - [`List`]: one key mapped to an ordered set of ids, materialized
//!   against the store on every read and re-published whenever a member is
//!   updated or deleted.
//!
//! ## Example
//!
//! ```ignore
//! use reactive_cache::{Cache, CacheOptions, Query, Record};
//!
//! #[derive(Clone, PartialEq, Debug, Record)]
//! #[record(entity = "users")]
//! struct User {
//!     #[record(id)]
//!     id: String,
//!     name: String,
//! }
//!
//! let cache = Cache::new(CacheOptions::default());
//! let users = cache.records::<User>()?;
//! users.query_item("42", |id| Query::resolve(fetch_user(id)));
//! let user = users.item("42").data();
//! ```
//!
//! [`Store`]: crate::Store

#[allow(clippy::module_inception)]
mod entity;
mod item;
mod list;
mod record;

pub use entity::{Entity, Extractor};
pub use item::Item;
pub use list::List;
pub use record::{composite_id, Record};
