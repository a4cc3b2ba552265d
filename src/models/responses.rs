//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{BackendKind, CacheStats};

/// Response body for reads (GET /get/:key, POST /get-or-create)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for writes (PUT /set, POST /remember)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for bulk removals (prefix, tag and entity sweeps)
#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    /// Number of keys or members removed
    pub removed: usize,
}

impl CountResponse {
    pub fn new(removed: usize) -> Self {
        Self { removed }
    }
}

/// Response body listing keys or tags
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Which backend the cache runs on
    pub backend: String,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Misses caused by a failing store
    pub degraded_reads: u64,
    /// Entries dropped by expiry purges
    pub expired: u64,
    /// Keys in the local key registry
    pub tracked_keys: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from cache statistics
    pub fn new(backend: BackendKind, stats: &CacheStats) -> Self {
        Self {
            backend: backend.to_string(),
            hits: stats.hits,
            misses: stats.misses,
            degraded_reads: stats.degraded_reads,
            expired: stats.expired,
            tracked_keys: stats.tracked_keys,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Backend serving the cache
    pub backend: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(backend: BackendKind) -> Self {
        Self {
            status: "healthy".to_string(),
            backend: backend.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
