use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// What `refresh` does while the current query is still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RefreshStrategy {
    /// Return the pending query; the fetcher is not invoked.
    #[default]
    Keep,
    /// Cancel the pending query and start a new one.
    Replace,
}

impl RefreshStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStrategy::Keep => "keep",
            RefreshStrategy::Replace => "replace",
        }
    }
}

impl fmt::Display for RefreshStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(RefreshStrategy::Keep),
            "replace" => Ok(RefreshStrategy::Replace),
            other => Err(CacheError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl TryFrom<String> for RefreshStrategy {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
