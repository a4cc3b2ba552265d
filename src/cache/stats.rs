//! Cache Statistics Module
//!
//! Tracks read outcomes shared by every clone of a cache handle.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time view of cache performance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of reads that resolved to not found
    pub misses: u64,
    /// Number of reads downgraded to a miss because the store failed
    pub degraded_reads: u64,
    /// Number of entries dropped by expiry purges
    pub expired: u64,
    /// Keys currently held in the key registry
    pub tracked_keys: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    degraded_reads: AtomicU64,
    expired: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed read. The caller still records the miss it turned into.
    pub fn record_degraded(&self) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Snapshot with the given tracked-key count.
    pub fn snapshot(&self, tracked_keys: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded_reads: self.degraded_reads.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            tracked_keys,
        }
    }
}
