//! Error types for the tag cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Read paths never surface misses as errors; `NotFound` only exists so the
/// HTTP layer can turn an empty read into a 404.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Null/empty key or otherwise unusable argument on a write
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend lacks the capability the operation needs
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// Network or connection failure talking to the remote store
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote store answered, but rejected the command
    #[error("Store error: {0}")]
    Store(String),

    /// A remote call did not finish within its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// A value could not be converted to or from its stored form
    #[error("Codec error: {0}")]
    Codec(String),
}

impl CacheError {
    /// True for failures caused by the remote store rather than the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_) | CacheError::Timeout(_))
    }
}

impl From<redis::RedisError> for CacheError {
    /// Only network-level failures count as transport errors; a reply the
    /// server sent back is a store error.
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::InvalidClientConfig {
            CacheError::InvalidArgument(err.to_string())
        } else if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            CacheError::Transport(err.to_string())
        } else {
            CacheError::Store(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            CacheError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Store(_) => StatusCode::BAD_GATEWAY,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            CacheError::Codec(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
