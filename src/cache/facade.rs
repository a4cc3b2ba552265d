//! Cache Facade Module
//!
//! The contract callers use. Composes the entry codec, the key registry and
//! the tag index on top of exactly one backend.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{
    Backend, BackendKind, CacheKey, CacheStats, Capability, Envelope, KeyPattern, KeyRegistry,
    MemoryBackend, RawBackend, RemoteBackend, StatsRecorder, TtlPolicy, UrlResolver,
};
use crate::config::Config;
use crate::error::{CacheError, Result};

static DEFAULT_CACHE: OnceCell<Cache> = OnceCell::new();

struct CacheInner {
    backend: Arc<dyn Backend>,
    registry: KeyRegistry,
    stats: StatsRecorder,
    default_ttl: TtlPolicy,
}

// == Cache ==
/// Handle to a tag-indexed cache. Clones share the same backend and registry.
///
/// Composite operations (`remember`, `clear`, `get_or_create_value`) are not
/// atomic across their steps; callers needing strict ordering per key or tag
/// must serialize externally.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    // == Constructors ==
    /// Wraps `backend` with the default one-hour sliding policy.
    pub fn new(backend: impl Backend) -> Self {
        Self::with_default_ttl(backend, TtlPolicy::default())
    }

    /// Wraps `backend`, applying `default_ttl` to writes without explicit TTL.
    pub fn with_default_ttl(backend: impl Backend, default_ttl: TtlPolicy) -> Self {
        Self::from_backend(Arc::new(backend), default_ttl)
    }

    /// Wraps an already shared backend.
    pub fn from_backend(backend: Arc<dyn Backend>, default_ttl: TtlPolicy) -> Self {
        debug!("Cache created on {} backend", backend.kind());
        Self {
            inner: Arc::new(CacheInner {
                backend,
                registry: KeyRegistry::new(),
                stats: StatsRecorder::new(),
                default_ttl,
            }),
        }
    }

    /// Host-managed in-process cache.
    pub fn memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// Manually tracked in-process cache.
    pub fn raw() -> Self {
        Self::new(RawBackend::new())
    }

    /// Cache on a shared remote store at `url`.
    pub async fn remote(url: &str, timeout: Duration) -> Result<Self> {
        let backend = RemoteBackend::connect(&UrlResolver::new(url), timeout).await?;
        Ok(Self::new(backend))
    }

    /// Builds the backend selected by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let default_ttl = TtlPolicy::Sliding(Duration::from_secs(config.default_ttl));

        let cache = match config.backend {
            BackendKind::Memory => {
                Self::with_default_ttl(MemoryBackend::new(config.max_entries), default_ttl)
            }
            BackendKind::Raw => Self::with_default_ttl(RawBackend::new(), default_ttl),
            BackendKind::Remote => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    CacheError::InvalidArgument("REDIS_URL is required for the remote backend".to_string())
                })?;
                let timeout = Duration::from_millis(config.remote_timeout_ms);
                let backend = RemoteBackend::connect(&UrlResolver::new(url), timeout).await?;
                Self::with_default_ttl(backend, default_ttl)
            }
        };
        Ok(cache)
    }

    // == Process Default ==
    /// Offers this cache as the process-wide default. The first caller wins;
    /// returns false if a default was already registered.
    pub fn register_default(&self) -> bool {
        let registered = DEFAULT_CACHE.set(self.clone()).is_ok();
        if registered {
            info!("Registered {} cache as process default", self.backend_kind());
        }
        registered
    }

    // == Introspection ==
    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.inner.backend.supports(capability)
    }

    pub fn default_ttl(&self) -> TtlPolicy {
        self.inner.default_ttl
    }

    /// Snapshot of every key in the local registry.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.inner.registry.snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.registry.len())
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub(crate) fn registry(&self) -> &KeyRegistry {
        &self.inner.registry
    }

    // == Create ==
    /// Stores `value` under `key`, overwriting whatever was there.
    ///
    /// An explicit `ttl` becomes an absolute deadline; otherwise the default
    /// policy applies. Returns the value back to the caller.
    pub async fn create_value<T: Serialize>(
        &self,
        key: impl Into<CacheKey>,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<T> {
        let key: CacheKey = key.into();
        let key = key.validate()?;
        let envelope = Envelope::scalar(&value)?;
        let policy = TtlPolicy::from_ttl(ttl, self.inner.default_ttl);

        self.inner.backend.store(key, envelope, policy).await?;
        self.inner.registry.track(key);
        debug!("Stored '{}'", key);
        Ok(value)
    }

    // == Get ==
    /// Reads `key` as `T`.
    ///
    /// Absence, expiry, a type mismatch and a failing store all come back as
    /// `None`. A key written by `remember` yields the first member of its set
    /// that fits `T`.
    pub async fn get_value<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        let key: CacheKey = key.into();
        if key.is_empty() {
            return None;
        }

        let value = self
            .load_or_miss(key.as_str())
            .await
            .and_then(|envelope| envelope.resolve::<T>());
        match value {
            Some(_) => self.inner.stats.record_hit(),
            None => self.inner.stats.record_miss(),
        }
        value
    }

    // == Get Or Create ==
    /// Returns the stored value if one resolves as `T`, otherwise stores
    /// `fallback` with the default policy and returns it.
    ///
    /// Concurrent callers may both miss; the later write wins.
    pub async fn get_or_create_value<T>(&self, key: impl Into<CacheKey>, fallback: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let key: CacheKey = key.into();
        key.validate()?;

        if let Some(existing) = self.get_value::<T>(&key).await {
            return Ok(existing);
        }
        self.create_value(key, fallback, None).await
    }

    // == Remove ==
    /// Deletes `key`. Removing an absent key is not an error.
    pub async fn remove(&self, key: impl Into<CacheKey>) -> Result<()> {
        let key: CacheKey = key.into();
        if key.is_empty() {
            return Ok(());
        }
        self.delete_tracked(key.as_str()).await?;
        Ok(())
    }

    /// Deletes every key starting with `prefix`. Returns how many keys were
    /// deleted from the store.
    ///
    /// Candidates come from the local registry, plus the store's own listing
    /// when it can enumerate keys. On a shared store without enumeration the
    /// sweep only sees keys this process wrote.
    pub async fn remove_starting_with(&self, prefix: &str) -> Result<usize> {
        let mut candidates: BTreeSet<String> =
            self.inner.registry.with_prefix(prefix).into_iter().collect();

        if self.supports(Capability::KeyEnumeration) {
            let listed = self
                .inner
                .backend
                .scan(&KeyPattern::Prefix(prefix.to_string()))
                .await?;
            candidates.extend(listed);
        } else {
            debug!("Prefix sweep of '{}' limited to tracked keys", prefix);
        }

        let mut removed = 0;
        for key in &candidates {
            if self.delete_tracked(key).await? {
                removed += 1;
            }
        }
        debug!("Removed {} keys starting with '{}'", removed, prefix);
        Ok(removed)
    }

    // == Maintenance ==
    /// Lets the backend drop expired entries and forgets their registry
    /// records. Returns the number of records dropped.
    pub async fn purge_expired(&self) -> usize {
        let gone = self.inner.backend.purge_expired().await;
        let mut forgotten = 0;
        for key in &gone {
            if self.inner.registry.forget(key) {
                forgotten += 1;
                self.retrack_if_live(key).await;
            }
        }
        self.inner.stats.record_expired(gone.len());
        forgotten
    }

    // == Internal Helpers ==
    /// Read used by every cache-semantics path: store failures become misses.
    pub(crate) async fn load_or_miss(&self, key: &str) -> Option<Envelope> {
        match self.inner.backend.load(key).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Read of '{}' degraded to a miss: {}", key, err);
                self.inner.stats.record_degraded();
                None
            }
        }
    }

    /// Deletes `key` from the registry and the store.
    ///
    /// The record goes first: a concurrent write that lands after the delete
    /// tracks the key again, so a live key is never left untracked.
    pub(crate) async fn delete_tracked(&self, key: &str) -> Result<bool> {
        self.inner.registry.forget(key);
        self.inner.backend.delete(key).await
    }

    /// Tracks `key` again if a concurrent write brought it back after its
    /// record was forgotten.
    pub(crate) async fn retrack_if_live(&self, key: &str) {
        if let Ok(Some(_)) = self.inner.backend.load(key).await {
            self.inner.registry.track(key);
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend_kind())
            .field("tracked_keys", &self.inner.registry.len())
            .finish()
    }
}

/// The cache registered with [`Cache::register_default`], if any.
pub fn default_cache() -> Option<&'static Cache> {
    DEFAULT_CACHE.get()
}

// == Cancellation ==
/// Runs `operation` unless `token` fires first, in which case the operation
/// is dropped and `Cancelled` is returned.
///
/// # Example
/// ```ignore
/// let token = CancellationToken::new();
/// let value: Option<String> = cancellable(&token, cache.get_value("k")).await?;
/// ```
pub async fn cancellable<F: Future>(token: &CancellationToken, operation: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CacheError::Cancelled),
        output = operation => Ok(output),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::Value;
    use std::thread::sleep;
    use tokio::sync::Barrier;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        items: Vec<String>,
    }

    fn caches() -> Vec<Cache> {
        vec![Cache::memory(), Cache::raw()]
    }

    /// Store whose every round trip fails, like an unreachable server.
    struct DownBackend;

    fn down() -> CacheError {
        CacheError::Transport("connection refused".to_string())
    }

    #[async_trait]
    impl Backend for DownBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        fn supports(&self, _capability: Capability) -> bool {
            true
        }

        async fn load(&self, _key: &str) -> Result<Option<Envelope>> {
            Err(down())
        }

        async fn store(&self, _key: &str, _envelope: Envelope, _ttl: TtlPolicy) -> Result<()> {
            Err(down())
        }

        async fn add_member(&self, _key: &str, _member: Value, _ttl: TtlPolicy) -> Result<()> {
            Err(down())
        }

        async fn remove_members(&self, _key: &str, _members: &[Value]) -> Result<usize> {
            Err(down())
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(down())
        }

        async fn scan(&self, _pattern: &KeyPattern) -> Result<Vec<String>> {
            Err(down())
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        for cache in caches() {
            let order = Order {
                id: 7,
                items: vec!["tea".into(), "cake".into()],
            };
            let returned = cache.create_value("order:7", order.clone(), None).await.unwrap();
            assert_eq!(returned, order);
            assert_eq!(cache.get_value::<Order>("order:7").await, Some(order));
        }
    }

    #[tokio::test]
    async fn test_overwrite_is_unconditional() {
        for cache in caches() {
            cache.create_value("k", 1, None).await.unwrap();
            cache.create_value("k", "two", None).await.unwrap();
            assert_eq!(cache.get_value::<String>("k").await, Some("two".to_string()));
            assert_eq!(cache.get_value::<i32>("k").await, None);
        }
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_on_write() {
        let cache = Cache::memory();
        let result = cache.create_value("", 1, None).await;
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        assert_eq!(cache.get_value::<i32>("").await, None);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = Cache::raw();
        cache.create_value("k", "text", None).await.unwrap();
        assert_eq!(cache.get_value::<u64>("k").await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_explicit_ttl_expires() {
        for cache in caches() {
            cache
                .create_value("short", 1, Some(Duration::from_secs(1)))
                .await
                .unwrap();
            assert_eq!(cache.get_value::<i32>("short").await, Some(1));

            sleep(Duration::from_millis(1100));
            assert_eq!(cache.get_value::<i32>("short").await, None);
        }
    }

    #[tokio::test]
    async fn test_get_or_create_materializes_once() {
        for cache in caches() {
            assert_eq!(cache.get_or_create_value("k", 5).await.unwrap(), 5);
            assert_eq!(cache.get_or_create_value("k", 9).await.unwrap(), 5);
        }
    }

    #[tokio::test]
    async fn test_get_or_create_replaces_mismatched_type() {
        let cache = Cache::memory();
        cache.create_value("k", "text", None).await.unwrap();
        assert_eq!(cache.get_or_create_value("k", 3_u8).await.unwrap(), 3);
        assert_eq!(cache.get_value::<u8>("k").await, Some(3));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        for cache in caches() {
            cache.create_value("a", 1, None).await.unwrap();
            cache.remove("missing").await.unwrap();
            cache.remove("missing").await.unwrap();
            assert_eq!(cache.tracked_keys(), vec!["a"]);

            cache.remove("a").await.unwrap();
            assert_eq!(cache.get_value::<i32>("a").await, None);
            assert!(cache.tracked_keys().is_empty());
        }
    }

    #[tokio::test]
    async fn test_remove_starting_with_is_exact() {
        for cache in caches() {
            for key in ["user:1:x", "user:1:y", "user:2:z"] {
                cache.create_value(key, key, None).await.unwrap();
            }

            let removed = cache.remove_starting_with("user:1:").await.unwrap();
            assert_eq!(removed, 2);
            assert_eq!(cache.get_value::<String>("user:1:x").await, None);
            assert_eq!(cache.get_value::<String>("user:1:y").await, None);
            assert_eq!(
                cache.get_value::<String>("user:2:z").await,
                Some("user:2:z".to_string())
            );
            assert_eq!(cache.tracked_keys(), vec!["user:2:z"]);
        }
    }

    #[tokio::test]
    async fn test_memory_prefix_sweep_sees_untracked_keys() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = Cache::from_backend(backend.clone(), TtlPolicy::default());
        backend
            .store("user:1:direct", Envelope::Scalar(1.into()), TtlPolicy::default())
            .await
            .unwrap();

        assert_eq!(cache.remove_starting_with("user:1:").await.unwrap(), 1);
        assert!(backend.load("user:1:direct").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_forgets_expired_keys() {
        let cache = Cache::raw();
        cache
            .create_value("short", 1, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        cache.create_value("long", 2, None).await.unwrap();

        sleep(Duration::from_millis(200));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.tracked_keys(), vec!["long"]);
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let cache = Cache::memory();
        let other = cache.clone();
        cache.create_value("shared", true, None).await.unwrap();
        assert_eq!(other.get_value::<bool>("shared").await, Some(true));
        assert_eq!(other.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_cancellable_returns_cancelled() {
        let cache = Cache::memory();
        let token = CancellationToken::new();
        token.cancel();

        let result = cancellable(&token, cache.get_value::<i32>("k")).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let cache = Cache::memory();
        cache.create_value("k", 4, None).await.unwrap();
        let token = CancellationToken::new();

        let value = cancellable(&token, cache.get_value::<i32>("k")).await.unwrap();
        assert_eq!(value, Some(4));
    }

    #[test]
    fn test_register_default_first_wins() {
        let first = Cache::raw();
        let second = Cache::memory();

        let registered = first.register_default();
        assert!(!second.register_default());
        let default = default_cache().expect("default registered");
        if registered {
            assert_eq!(default.backend_kind(), BackendKind::Raw);
        }
    }

    #[tokio::test]
    async fn test_failing_store_degrades_reads_and_propagates_writes() {
        let cache = Cache::new(DownBackend);

        assert_eq!(cache.get_value::<i32>("k").await, None);
        assert_eq!(cache.tag_members("orders").await, Vec::<String>::new());
        assert!(cache.get_keys_by_tag("orders").await.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.degraded_reads, 2);

        let result = cache.create_value("k", 1, None).await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
        let result = cache.remember("k", &1, &["orders"]).await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
        let result = cache.get_or_create_value("k", 1).await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
        assert!(cache.remove("k").await.is_err());
        assert!(cache.remove_starting_with("k").await.is_err());
        assert!(cache.clear(&["orders"]).await.is_err());

        // Failed writes leave nothing behind in the registry.
        assert!(cache.tracked_keys().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_live_keys_stay_tracked_under_concurrent_remove() {
        for cache in caches() {
            let mut handles = Vec::new();
            for i in 0..64 {
                let key = format!("race:{}", i);
                let barrier = Arc::new(Barrier::new(2));

                let (remover, writer) = (cache.clone(), cache.clone());
                let (remove_key, write_key) = (key.clone(), key);
                let (remove_gate, write_gate) = (barrier.clone(), barrier);
                handles.push(tokio::spawn(async move {
                    remove_gate.wait().await;
                    remover.remove(remove_key).await
                }));
                handles.push(tokio::spawn(async move {
                    write_gate.wait().await;
                    writer.create_value(write_key, 1, None).await.map(|_| ())
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let tracked = cache.tracked_keys();
            for i in 0..64 {
                let key = format!("race:{}", i);
                if cache.get_value::<i32>(key.as_str()).await.is_some() {
                    assert!(tracked.contains(&key), "live key {} is untracked", key);
                }
            }

            cache.remove_starting_with("race:").await.unwrap();
            for i in 0..64 {
                let key = format!("race:{}", i);
                assert_eq!(cache.get_value::<i32>(key).await, None);
            }
        }
    }
}
