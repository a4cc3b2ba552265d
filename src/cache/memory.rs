//! Host-Managed Memory Backend
//!
//! In-process map where Moka enforces per-entry sliding or absolute expiry on
//! access; the facade only adds the key registry and envelope resolution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashSet;
use moka::notification::RemovalCause;
use moka::ops::compute::Op;
use moka::sync::Cache as MokaCache;
use moka::Expiry;
use serde_json::Value;
use tracing::debug;

use crate::cache::{Backend, BackendKind, Capability, Envelope, KeyPattern, TtlPolicy};
use crate::error::Result;

/// Default capacity of the host-managed map.
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

#[derive(Debug, Clone)]
struct Slot {
    envelope: Envelope,
    ttl: TtlPolicy,
}

/// Per-entry expiry driven by each slot's policy.
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, value: &Slot, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl.remaining())
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &Slot,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        match value.ttl {
            TtlPolicy::Sliding(window) => Some(window),
            TtlPolicy::Absolute(_) => duration_until_expiry,
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl.remaining())
    }
}

// == Memory Backend ==
/// Moka-backed store. Cloning is cheap and shares the same map.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: MokaCache<String, Slot>,
    /// Keys Moka dropped on its own, waiting for the next purge.
    evicted: Arc<DashSet<String>>,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates a map holding at most `max_entries` entries.
    pub fn new(max_entries: u64) -> Self {
        let evicted = Arc::new(DashSet::new());
        let sink = Arc::clone(&evicted);

        let inner = MokaCache::builder()
            .max_capacity(max_entries)
            .expire_after(SlotExpiry)
            .eviction_listener(move |key: Arc<String>, _slot: Slot, cause: RemovalCause| {
                if cause.was_evicted() {
                    sink.insert(key.as_ref().clone());
                }
            })
            .build();

        Self { inner, evicted }
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::KeyEnumeration | Capability::EntityKeySweep => true,
        }
    }

    async fn load(&self, key: &str) -> Result<Option<Envelope>> {
        Ok(self.inner.get(key).map(|slot| slot.envelope))
    }

    async fn store(&self, key: &str, envelope: Envelope, ttl: TtlPolicy) -> Result<()> {
        self.inner.insert(key.to_string(), Slot { envelope, ttl });
        Ok(())
    }

    async fn add_member(&self, key: &str, member: Value, ttl: TtlPolicy) -> Result<()> {
        self.inner
            .entry(key.to_string())
            .and_upsert_with(|existing| Slot {
                envelope: Envelope::union(existing.map(|e| e.into_value().envelope), member),
                ttl,
            });
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[Value]) -> Result<usize> {
        let mut removed = 0;
        self.inner
            .entry(key.to_string())
            .and_compute_with(|existing| match existing {
                Some(entry) => {
                    let mut slot = entry.into_value();
                    removed = slot.envelope.remove_members(members);
                    if removed == 0 {
                        Op::Nop
                    } else if slot.envelope.is_set() && slot.envelope.members().is_empty() {
                        Op::Remove
                    } else {
                        Op::Put(slot)
                    }
                }
                None => Op::Nop,
            });
        Ok(removed)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.remove(key).is_some())
    }

    async fn scan(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Vec<String> {
        self.inner.run_pending_tasks();

        let drained: Vec<String> = self.evicted.iter().map(|key| (*key).clone()).collect();
        for key in &drained {
            self.evicted.remove(key);
        }

        // A key rewritten after eviction is live again.
        let gone: Vec<String> = drained
            .into_iter()
            .filter(|key| !self.inner.contains_key(key))
            .collect();
        debug!("Memory backend purge: {} keys gone", gone.len());
        gone
    }
}
