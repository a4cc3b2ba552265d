//! Expiry Purge Task
//!
//! Background task that periodically asks the cache to purge expired entries
//! and forget their key registry records.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that periodically purges expired cache entries.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between purges. Between runs, keys that expired silently keep their
/// registry records; sweeps tolerate that.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Cache::memory();
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), 30);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Cache, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry purge task on {} backend with interval of {} seconds",
            cache.backend_kind(),
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let forgotten = cache.purge_expired().await;
            if forgotten > 0 {
                info!("Expiry purge: forgot {} expired keys", forgotten);
            } else {
                debug!("Expiry purge: no expired keys found");
            }
        }
    })
}
