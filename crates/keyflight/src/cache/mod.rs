//! Two-tier caching with single-flight computation.
//!
//! ## Architecture
//!
//! - **L1 Cache (LRU)**: In-memory, bounded per namespace, per-instance
//! - **L2 Cache (RemoteCache)**: Network, shared across instances, optional
//! - **Single-flight**: At most one computation per key at a time
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get_or_compute → L1 (LRU) → L2 (Redis) → compute()
//!                     ↓            ↓           ↓
//!                 <1µs latency  ~5ms latency  caller-defined
//! ```
//!
//! ## Graceful Degradation
//!
//! If the remote tier is unavailable or disabled, every L2 operation is
//! logged and skipped; the cache keeps working in L1-only mode.

pub mod local;
pub mod manager;
pub mod remote;
mod singleflight;
pub mod tiered;

pub use local::{LocalCache, LocalCacheStats};
pub use manager::CacheManager;
pub use remote::{DynRemoteCache, MemoryRemoteCache, MemoryRemoteStats, NoopRemoteCache, RemoteCache};
pub use tiered::{CacheSettings, ComputeOptions, TieredCache, TieredCacheStats};
