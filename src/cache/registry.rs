//! Key Registry Module
//!
//! Process-local record of every key written through the cache.

use dashmap::DashSet;

// == Key Registry ==
/// Tracks keys created through the facade.
///
/// The registry is an upper bound on the live keyspace: a key is recorded at
/// write time and dropped when it is removed through the cache, but silent TTL
/// expiry leaves a stale record behind until the next purge.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: DashSet<String>,
}

impl KeyRegistry {
    // == Constructor ==
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            keys: DashSet::new(),
        }
    }

    // == Track ==
    /// Records a key. Returns true if it was not tracked yet.
    pub fn track(&self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    // == Forget ==
    /// Drops a key's record. Returns true if it was tracked.
    pub fn forget(&self, key: &str) -> bool {
        self.keys.remove(key).is_some()
    }

    // == Contains ==
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    // == Prefix Scan ==
    /// Tracked keys that start with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.matching(|key| key.starts_with(prefix))
    }

    /// Tracked keys that contain `needle` anywhere.
    pub fn containing(&self, needle: &str) -> Vec<String> {
        self.matching(|key| key.contains(needle))
    }

    /// Tracked keys accepted by `predicate`, sorted.
    pub fn matching(&self, predicate: impl Fn(&str) -> bool) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keys
            .iter()
            .filter(|key| predicate(key.as_str()))
            .map(|key| (*key).clone())
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of every tracked key, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        self.matching(|_| true)
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
