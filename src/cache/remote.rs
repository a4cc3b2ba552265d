//! Remote Store Backend
//!
//! Redis-backed storage for cache state shared between processes. Scalars are
//! JSON strings, tag sets and `Remember` sets are native Redis sets, and prefix
//! sweeps page through the keyspace with `SCAN`.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::entry::{from_wire, to_wire};
use crate::cache::{Backend, BackendKind, Capability, Envelope, KeyPattern, TtlPolicy};
use crate::error::{CacheError, Result};

/// Default bound on a single round trip to the store.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Keys requested per SCAN page.
const SCAN_PAGE_SIZE: usize = 500;

/// Adds a member to a set, replacing whatever non-set value holds the key,
/// and refreshes the expiry. Atomic on the server.
static ADD_MEMBER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('TYPE', KEYS[1]).ok ~= 'set' then
            redis.call('DEL', KEYS[1])
        end
        local added = redis.call('SADD', KEYS[1], ARGV[1])
        redis.call('EXPIRE', KEYS[1], ARGV[2])
        return added
        ",
    )
});

// == Connection Resolver ==
/// Produces a ready connection to the remote store.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self) -> Result<ConnectionManager>;
}

/// Resolves a connection from a `redis://` URL.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    url: String,
}

impl UrlResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ConnectionResolver for UrlResolver {
    async fn resolve(&self) -> Result<ConnectionManager> {
        let client = Client::open(self.url.as_str())?;
        Ok(ConnectionManager::new(client).await?)
    }
}

// == Remote Backend ==
/// Redis store; every call is bounded by `timeout`.
#[derive(Clone)]
pub struct RemoteBackend {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RemoteBackend {
    // == Constructor ==
    /// Connects through `resolver`, giving up after `timeout`.
    pub async fn connect(resolver: &dyn ConnectionResolver, timeout: Duration) -> Result<Self> {
        let connection = match tokio::time::timeout(timeout, resolver.resolve()).await {
            Ok(connection) => connection?,
            Err(_) => return Err(CacheError::Timeout(timeout)),
        };

        let backend = Self {
            connection,
            timeout,
        };
        backend.ping().await?;
        info!("Connected to remote cache store");
        Ok(backend)
    }

    /// Round trip to the server.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        self.bounded(redis::cmd("PING").query_async::<()>(&mut conn))
            .await
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    async fn load_set(&self, key: &str) -> Result<Option<Envelope>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = self.bounded(conn.smembers(key)).await?;
        if members.is_empty() {
            return Ok(None);
        }
        Ok(Some(Envelope::set(members.iter().map(|m| from_wire(m)))))
    }
}

/// Whole seconds of server-side expiry for `ttl`, rounded up, at least one.
///
/// The store cannot slide a TTL on read, so sliding windows become a fixed
/// expiry counted from the write.
pub fn expiry_secs(ttl: &TtlPolicy) -> u64 {
    let remaining = ttl.remaining();
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

fn wire_members(members: &[Value]) -> Result<Vec<String>> {
    members.iter().map(to_wire).collect()
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::KeyEnumeration | Capability::EntityKeySweep => true,
        }
    }

    async fn load(&self, key: &str) -> Result<Option<Envelope>> {
        let mut conn = self.connection.clone();
        match self.bounded(conn.get::<_, Option<String>>(key)).await {
            Ok(raw) => Ok(raw.map(|raw| Envelope::Scalar(from_wire(&raw)))),
            Err(err @ CacheError::Store(_)) => {
                // Sets answer GET with WRONGTYPE; read the key as a set instead.
                debug!("Scalar read of '{}' failed ({}), reading as set", key, err);
                self.load_set(key).await
            }
            Err(err) => Err(err),
        }
    }

    async fn store(&self, key: &str, envelope: Envelope, ttl: TtlPolicy) -> Result<()> {
        let mut conn = self.connection.clone();
        let secs = expiry_secs(&ttl);

        match envelope {
            Envelope::Scalar(value) => {
                let raw = to_wire(&value)?;
                self.bounded(conn.set_ex::<_, _, ()>(key, raw, secs)).await
            }
            Envelope::Set(members) => {
                let raw = wire_members(&members)?;
                let mut pipe = redis::pipe();
                pipe.atomic().del(key).ignore();
                if !raw.is_empty() {
                    pipe.sadd(key, raw)
                        .ignore()
                        .expire(key, secs as i64)
                        .ignore();
                }
                self.bounded(pipe.query_async::<()>(&mut conn)).await
            }
        }
    }

    async fn add_member(&self, key: &str, member: Value, ttl: TtlPolicy) -> Result<()> {
        let mut conn = self.connection.clone();
        let raw = to_wire(&member)?;
        let mut invocation = ADD_MEMBER.key(key);
        invocation.arg(raw).arg(expiry_secs(&ttl));
        let _added: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[Value]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let raw = wire_members(members)?;
        // The server deletes a set once its last member is gone.
        self.bounded(conn.srem::<_, _, usize>(key, raw)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self.bounded(conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let glob = pattern.to_glob();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        // Cursor pages keep each round trip short and inside the timeout.
        loop {
            let (next, page): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&glob)
                        .arg("COUNT")
                        .arg(SCAN_PAGE_SIZE)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }
}
