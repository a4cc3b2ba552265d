//! Tag Cache - a tag-indexed cache facade
//!
//! One cache contract over interchangeable backends (a host-managed
//! in-process map, a manually tracked in-process map, or a shared Redis
//! store), with group invalidation by tag and per-user tag sets.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{cancellable, default_cache, BackendKind, Cache};
pub use config::{Config, ConfigProvider, EnvConfig};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
