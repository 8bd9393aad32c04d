use std::fmt;

use serde::{Deserialize, Serialize};

/// An owned sequence of path segments.
///
/// Segments are opaque: once a path is built from segments, a segment may
/// itself contain dots without changing which listeners it reaches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// The empty path. Emitting here only reaches root listeners.
    pub fn root() -> Self {
        KeyPath(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath(segments.into_iter().map(Into::into).collect())
    }

    /// Split a dotted key (`"update.users.42"`) into segments.
    ///
    /// The empty string parses to the root path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return KeyPath::root();
        }
        KeyPath::new(dotted.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        KeyPath(segments)
    }

    pub fn join(&self, other: &KeyPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        KeyPath(segments)
    }

    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        KeyPath(segments)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(segments: Vec<&str>) -> Self {
        KeyPath::new(segments)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        KeyPath::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(segments: [&str; N]) -> Self {
        KeyPath::new(segments)
    }
}

impl From<&KeyPath> for KeyPath {
    fn from(path: &KeyPath) -> Self {
        path.clone()
    }
}
