//! Cache Key Module
//!
//! Opaque string identifiers derived from any key-like value.

use std::fmt;

use crate::error::{CacheError, Result};

// == Cache Key ==
/// An opaque cache key. Two keys are equal when their strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from anything with a stable `Display` form.
    pub fn of(key: impl fmt::Display) -> Self {
        Self(key.to_string())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects empty keys; used on every write path. Any other string,
    /// whitespace included, is a distinct key.
    pub fn validate(&self) -> Result<&str> {
        if self.0.is_empty() {
            return Err(CacheError::InvalidArgument(
                "Key cannot be empty".to_string(),
            ));
        }
        Ok(&self.0)
    }

    /// Key of the tag set owned by `user_id`.
    pub fn user_tags(user_id: impl fmt::Display) -> Self {
        Self(format!("{}{}{}", USER_TAGS_PREFIX, user_id, USER_TAGS_SUFFIX))
    }

    /// Extracts the user id from a `user:{id}:tags` key.
    pub fn user_id(key: &str) -> Option<&str> {
        key.strip_prefix(USER_TAGS_PREFIX)?
            .strip_suffix(USER_TAGS_SUFFIX)
            .filter(|id| !id.is_empty())
    }

    /// True for keys shaped like `user:{id}:tags`.
    pub fn is_user_tags(key: &str) -> bool {
        Self::user_id(key).is_some()
    }
}

/// Leading segment of every per-user tag set key.
pub const USER_TAGS_PREFIX: &str = "user:";

/// Trailing segment of every per-user tag set key.
pub const USER_TAGS_SUFFIX: &str = ":tags";

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self(key.clone())
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}
