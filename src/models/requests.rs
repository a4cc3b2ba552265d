//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

fn check_tags(tags: &[String]) -> Option<String> {
    if tags.iter().any(|tag| tag.is_empty()) {
        return Some("Tags cannot be empty".to_string());
    }
    None
}

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds, counted from the write
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.ttl == Some(0) {
            return Some("TTL must be at least one second".to_string());
        }
        None
    }
}

/// Request body for POST /get-or-create
#[derive(Debug, Clone, Deserialize)]
pub struct GetOrCreateRequest {
    pub key: String,
    /// Stored only when the key holds nothing usable
    pub fallback: Value,
}

impl GetOrCreateRequest {
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        None
    }
}

/// Request body for POST /remember
#[derive(Debug, Clone, Deserialize)]
pub struct RememberRequest {
    pub key: String,
    pub data: Value,
    /// Tags the key is indexed under
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RememberRequest {
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        check_tags(&self.tags)
    }
}

/// Request body carrying a list of tags (POST /clear, /users/:id/tags)
#[derive(Debug, Clone, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

impl TagsRequest {
    pub fn validate(&self) -> Option<String> {
        check_tags(&self.tags)
    }
}
