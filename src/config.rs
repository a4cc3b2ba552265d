//! Configuration Module
//!
//! Handles loading server and cache configuration from environment variables,
//! or from any other source behind [`ConfigProvider`].

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::cache::{BackendKind, Cache, DEFAULT_MAX_ENTRIES};
use crate::error::Result;

/// Default sliding TTL in seconds.
pub const DEFAULT_TTL_SECS: u64 = 3600;
/// Default bound on a remote round trip, in milliseconds.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 2000;

// == Config Provider ==
/// Source of configuration values addressed by dotted path.
///
/// `"caching.default_ttl"` and `"caching:default_ttl"` name the same value.
pub trait ConfigProvider: Send + Sync {
    /// Raw value at `path`, if set.
    fn value(&self, path: &str) -> Option<String>;

    /// Value at `path` parsed as `T`. Unparseable values read as unset.
    fn get<T: FromStr>(&self, path: &str) -> Option<T>
    where
        Self: Sized,
    {
        let raw = self.value(path)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparseable config value at '{}': {}", path, raw);
                None
            }
        }
    }
}

/// Environment variable backing a dotted config path.
///
/// Separators become underscores and the result is uppercased, so
/// `caching.default_ttl` reads `CACHING_DEFAULT_TTL`.
pub fn env_var_name(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '.' | ':' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Reads configuration from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigProvider for EnvConfig {
    fn value(&self, path: &str) -> Option<String> {
        env::var(env_var_name(path)).ok()
    }
}

/// In-memory provider keyed by dotted path.
impl ConfigProvider for HashMap<String, String> {
    fn value(&self, path: &str) -> Option<String> {
        self.get(path)
            .or_else(|| self.get(&path.replace(':', ".")))
            .cloned()
    }
}

/// Looks up `path` through the cache, asking `provider` only on a miss.
///
/// Found values are memoized under `config:{path}` with the cache's default
/// policy; unset values are not cached.
pub async fn cached_lookup(
    provider: &dyn ConfigProvider,
    cache: &Cache,
    path: &str,
) -> Result<Option<String>> {
    let key = format!("config:{}", path);
    if let Some(hit) = cache.get_value::<String>(key.as_str()).await {
        return Ok(Some(hit));
    }

    match provider.value(path) {
        Some(value) => {
            debug!("Config value '{}' loaded from provider", path);
            Ok(Some(cache.create_value(key, value, None).await?))
        }
        None => Ok(None),
    }
}

// == Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage engine behind the cache
    pub backend: BackendKind,
    /// Default sliding TTL in seconds for entries without explicit TTL
    pub default_ttl: u64,
    /// Capacity of the host-managed in-process map
    pub max_entries: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background purge interval in seconds
    pub cleanup_interval: u64,
    /// Remote store URL, required for the remote backend
    pub redis_url: Option<String>,
    /// Bound on a single remote round trip, in milliseconds
    pub remote_timeout_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `memory`, `raw` or `remote` (default: memory)
    /// - `DEFAULT_TTL` - Default sliding TTL in seconds (default: 3600)
    /// - `MAX_ENTRIES` - Host-managed map capacity (default: 100000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Purge frequency in seconds (default: 30)
    /// - `REDIS_URL` - Remote store URL (no default)
    /// - `REMOTE_TIMEOUT_MS` - Remote round trip bound (default: 2000)
    pub fn from_env() -> Self {
        Self::from_provider(&EnvConfig)
    }

    /// Builds a Config from any provider, falling back to defaults.
    pub fn from_provider<P: ConfigProvider>(provider: &P) -> Self {
        let defaults = Self::default();
        Self {
            backend: provider.get("cache.backend").unwrap_or(defaults.backend),
            default_ttl: provider.get("default.ttl").unwrap_or(defaults.default_ttl),
            max_entries: provider.get("max.entries").unwrap_or(defaults.max_entries),
            server_port: provider.get("server.port").unwrap_or(defaults.server_port),
            cleanup_interval: provider
                .get("cleanup.interval")
                .unwrap_or(defaults.cleanup_interval),
            redis_url: provider
                .value("redis.url")
                .filter(|url| !url.trim().is_empty()),
            remote_timeout_ms: provider
                .get("remote.timeout_ms")
                .unwrap_or(defaults.remote_timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            default_ttl: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            server_port: 3000,
            cleanup_interval: 30,
            redis_url: None,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
        }
    }
}
