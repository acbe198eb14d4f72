//! Identity types for cache entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Caller-chosen identifier correlating one `load` call with later reads.
///
/// Uniqueness is the caller's business: loading twice under the same key
/// overwrites the earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaderKey(String);

impl LoaderKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoaderKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for LoaderKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&LoaderKey> for LoaderKey {
    fn from(key: &LoaderKey) -> Self {
        key.clone()
    }
}

impl Borrow<str> for LoaderKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of one query within a query set.
pub type QueryName = String;

/// Resolved query values keyed by query name.
pub type ResultSet = BTreeMap<QueryName, Value>;

/// Monotonic stamp assigned to each successful cache write.
///
/// Live subscriptions are bound to the generation they were opened for, so a
/// re-load under the same key starts a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_loader_key_display_and_borrow() {
        let key = LoaderKey::from("issues/42");
        assert_eq!(key.to_string(), "issues/42");

        let mut map = HashMap::new();
        map.insert(key.clone(), 1);
        assert_eq!(map.get("issues/42"), Some(&1));
    }

    #[test]
    fn test_loader_key_serializes_as_plain_string() {
        let key = LoaderKey::new("home");
        let json = serde_json::to_string(&key).expect("serialize key");
        assert_eq!(json, "\"home\"");
    }

    #[test]
    fn test_generation_ordering() {
        assert!(Generation::new(2) > Generation::new(1));
        assert_eq!(Generation::new(7).value(), 7);
    }
}
