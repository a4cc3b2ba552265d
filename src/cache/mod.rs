//! Cache Module
//!
//! Tag-indexed caching over interchangeable backends: a host-managed
//! in-process map, a manually tracked in-process map, and a shared Redis
//! store.

mod backend;
mod entry;
mod facade;
mod key;
mod memory;
mod raw;
mod registry;
mod remote;
mod stats;
mod tags;


// Re-export public types
pub use backend::{Backend, BackendKind, Capability, KeyPattern};
pub use entry::{decode, encode, Envelope, TtlPolicy, DEFAULT_SLIDING_TTL};
pub use facade::{cancellable, default_cache, Cache};
pub use key::CacheKey;
pub use memory::{MemoryBackend, DEFAULT_MAX_ENTRIES};
pub use raw::RawBackend;
pub use registry::KeyRegistry;
pub use remote::{ConnectionResolver, RemoteBackend, UrlResolver, DEFAULT_REMOTE_TIMEOUT};
pub use stats::{CacheStats, StatsRecorder};
