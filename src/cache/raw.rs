//! Manually-Tracked Memory Backend
//!
//! In-process map for hosts whose map has no per-entry TTL. The backend
//! computes every deadline itself and checks it on access; the store is never
//! asked which keys exist, so prefix and tag sweeps rely on the key registry.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{Backend, BackendKind, Capability, Envelope, TtlPolicy};
use crate::error::Result;

#[derive(Debug, Clone)]
struct RawSlot {
    envelope: Envelope,
    ttl: TtlPolicy,
    /// Expiration timestamp (Unix milliseconds)
    expires_at: u64,
}

impl RawSlot {
    fn new(envelope: Envelope, ttl: TtlPolicy, now: u64) -> Self {
        Self {
            envelope,
            ttl,
            expires_at: ttl.deadline_ms(now),
        }
    }

    /// Expired once the current time reaches the deadline.
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

// == Raw Backend ==
/// DashMap store with cache-computed deadlines.
#[derive(Debug, Default)]
pub struct RawBackend {
    entries: DashMap<String, RawSlot>,
    /// Keys dropped lazily on read, waiting for the next purge.
    reaped: DashSet<String>,
}

impl RawBackend {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reap(&self, key: &str, now: u64) {
        if self
            .entries
            .remove_if(key, |_, slot| slot.is_expired(now))
            .is_some()
        {
            self.reaped.insert(key.to_string());
        }
    }
}

#[async_trait]
impl Backend for RawBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Raw
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    async fn load(&self, key: &str) -> Result<Option<Envelope>> {
        let now = current_timestamp_ms();

        let found = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                if slot.ttl.is_sliding() {
                    slot.expires_at = slot.ttl.deadline_ms(now);
                }
                Some(Some(slot.envelope.clone()))
            }
            Some(_) => Some(None),
            None => None,
        };

        match found {
            Some(Some(envelope)) => Ok(Some(envelope)),
            Some(None) => {
                self.reap(key, now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, envelope: Envelope, ttl: TtlPolicy) -> Result<()> {
        let now = current_timestamp_ms();
        self.entries
            .insert(key.to_string(), RawSlot::new(envelope, ttl, now));
        Ok(())
    }

    async fn add_member(&self, key: &str, member: Value, ttl: TtlPolicy) -> Result<()> {
        let now = current_timestamp_ms();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RawSlot::new(Envelope::Set(Vec::new()), ttl, now));

        let existing = if slot.is_expired(now) {
            None
        } else {
            Some(std::mem::replace(&mut slot.envelope, Envelope::Set(Vec::new())))
        };
        *slot = RawSlot::new(Envelope::union(existing, member), ttl, now);
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[Value]) -> Result<usize> {
        let now = current_timestamp_ms();

        let (removed, emptied) = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                let removed = slot.envelope.remove_members(members);
                let emptied = slot.envelope.is_set() && slot.envelope.members().is_empty();
                (removed, emptied)
            }
            _ => (0, false),
        };

        if emptied {
            self.entries
                .remove_if(key, |_, slot| slot.envelope.is_set() && slot.envelope.members().is_empty());
        }
        Ok(removed)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Vec<String> {
        let now = current_timestamp_ms();

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| slot.is_expired(now))
            .map(|slot| slot.key().clone())
            .collect();
        for key in &expired {
            self.reap(key, now);
        }

        let drained: Vec<String> = self.reaped.iter().map(|key| (*key).clone()).collect();
        for key in &drained {
            self.reaped.remove(key);
        }

        // A key rewritten after it was reaped is live again.
        let gone: Vec<String> = drained
            .into_iter()
            .filter(|key| !self.entries.contains_key(key))
            .collect();
        debug!("Raw backend purge: {} keys gone", gone.len());
        gone
    }
}
