use serde::Serialize;

use crate::error::CacheError;

/// Trait for types that can be cached as entity records.
///
/// Usually derived:
///
/// ```ignore
/// #[derive(Clone, PartialEq, Record)]
/// #[record(entity = "memberships")]
/// struct Membership {
///     #[record(id)]
///     org: String,
///     #[record(id)]
///     user: u64,
/// }
/// ```
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Entity name; also the store name and the first key segment of every
    /// item and list of this record type.
    const ENTITY: &'static str;

    /// Store key of this record. Must be deterministic.
    fn id(&self) -> String;
}

/// Encode a composite id as compact JSON.
///
/// The encoding is lossless, so two records share an id exactly when their
/// id parts are equal.
pub fn composite_id<I: Serialize + ?Sized>(parts: &I) -> Result<String, CacheError> {
    Ok(serde_json::to_string(parts)?)
}
