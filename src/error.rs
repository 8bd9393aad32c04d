use std::fmt;

/// Every failure the cache can report.
///
/// Errors are `Clone` because one query failure is delivered to every
/// consumer awaiting that query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The fetcher rejected. Never retried by the cache.
    Fetch(String),
    /// The query was cancelled before it settled.
    Cancelled,
    /// A read was issued against a query manager that never fetched.
    Idle,
    /// A refresh strategy literal that is neither `keep` nor `replace`.
    UnsupportedStrategy(String),
    /// A merge-mutation targeted an id with no cached value.
    UnknownMutatedItem { entity: String, id: String },
    /// An entity name was reused with a different value type.
    StoreTypeMismatch { entity: String },
    /// Serialization or deserialization failed.
    Serde(String),
}

impl CacheError {
    /// Wrap any fetcher error as a fetch failure.
    pub fn fetch(err: impl fmt::Display) -> Self {
        CacheError::Fetch(err.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Fetch(message) => write!(f, "fetch failed: {}", message),
            CacheError::Cancelled => write!(f, "query cancelled"),
            CacheError::Idle => write!(f, "no query has been started"),
            CacheError::UnsupportedStrategy(strategy) => {
                write!(f, "unsupported refresh strategy: {}", strategy)
            }
            CacheError::UnknownMutatedItem { entity, id } => write!(
                f,
                "cannot merge mutation into {}:{} (no cached value)",
                entity, id
            ),
            CacheError::StoreTypeMismatch { entity } => write!(
                f,
                "entity {} is already registered with a different value type",
                entity
            ),
            CacheError::Serde(message) => write!(f, "serialization error: {}", message),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serde(err.to_string())
    }
}

impl From<bitcode::Error> for CacheError {
    fn from(err: bitcode::Error) -> Self {
        CacheError::Serde(err.to_string())
    }
}
