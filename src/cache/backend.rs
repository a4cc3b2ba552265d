//! Backend Module
//!
//! The storage contract every engine behind the cache facade implements.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{Envelope, TtlPolicy};
use crate::error::{CacheError, Result};

// == Backend Kind ==
/// Which storage engine a backend is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process map that manages expiry itself.
    Memory,
    /// In-process map with deadlines computed and tracked by the cache.
    Raw,
    /// Shared remote key/value store.
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Raw => "raw",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "raw" | "fast" => Ok(BackendKind::Raw),
            "remote" | "redis" => Ok(BackendKind::Remote),
            _ => Err(format!("Unknown cache backend: {}", s)),
        }
    }
}

// == Capability ==
/// Optional abilities a backend may have beyond the core contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The store can list its own keys by pattern.
    KeyEnumeration,
    /// Entity-wide key sweeps are reliable on this store.
    EntityKeySweep,
}

// == Key Pattern ==
/// Filter for key enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Prefix(String),
    Contains(String),
}

impl KeyPattern {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Contains(needle) => key.contains(needle.as_str()),
        }
    }

    /// Glob form understood by the remote store, with glob metacharacters
    /// in the literal part escaped.
    pub fn to_glob(&self) -> String {
        match self {
            KeyPattern::Prefix(prefix) => format!("{}*", escape_glob(prefix)),
            KeyPattern::Contains(needle) => format!("*{}*", escape_glob(needle)),
        }
    }
}

fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// == Backend Trait ==
/// Raw storage underneath the facade.
///
/// Every single-key operation must be safe under concurrent callers. Misses
/// are `Ok(None)`; errors are reserved for a store that failed.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn supports(&self, capability: Capability) -> bool;

    /// Reads the envelope at `key`.
    async fn load(&self, key: &str) -> Result<Option<Envelope>>;

    /// Overwrites `key` unconditionally.
    async fn store(&self, key: &str, envelope: Envelope, ttl: TtlPolicy) -> Result<()>;

    /// Unions `member` into the set at `key`, creating it when absent.
    async fn add_member(&self, key: &str, member: Value, ttl: TtlPolicy) -> Result<()>;

    /// Removes `members` from the set at `key`; an emptied set is deleted.
    /// Returns how many members were removed.
    async fn remove_members(&self, key: &str, members: &[Value]) -> Result<usize>;

    /// Deletes `key`. Returns true if something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Lists stored keys matching `pattern`.
    async fn scan(&self, _pattern: &KeyPattern) -> Result<Vec<String>> {
        Err(CacheError::Unsupported {
            operation: "scan",
            backend: self.kind().as_str(),
        })
    }

    /// Drops expired entries and returns their keys.
    async fn purge_expired(&self) -> Vec<String> {
        Vec::new()
    }
}
