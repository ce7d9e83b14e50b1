//! # keyflight
//!
//! Batched key loading and two-tier caching for services that resolve many
//! small lookups per request.
//!
//! This crate provides:
//!
//! - A window-based batch loader that turns concurrent `load(key)` calls into
//!   one bulk fetch, with deduplication and per-loader memoization
//! - A tiered cache (bounded in-process LRU plus an optional remote tier)
//!   with single-flight `get_or_compute`
//! - Isolated cache namespaces with their own capacity and TTL
//! - Structured, collision-free cache keys
//!
//! ## Overview
//!
//! ```ignore
//! use keyflight::{CacheManager, ComputeOptions, NoopRemoteCache};
//!
//! let caches = CacheManager::from_config(&config.cache, NoopRemoteCache::shared())?;
//! let org = caches
//!     .get_or_compute("org:42", move || load_org(42), ComputeOptions::new().in_namespace("org_config"))
//!     .await?;
//! ```
//!
//! ## Configuration
//!
//! Add to `keyflight.toml`:
//!
//! ```toml
//! [loader]
//! batch_window_ms = 10
//! max_batch_size = 100
//!
//! [cache.namespaces.api_key]
//! capacity = 10000
//! ttl_secs = 60
//! expiration = "fixed"
//!
//! [redis]
//! enabled = true
//! url = "redis://localhost:6379"
//! ```
//!
//! ## Modules
//!
//! - [`loader`] - Batch loader and bulk-fetch adapters
//! - [`registry`] - Loaders keyed by entity kind
//! - [`cache`] - Local, remote and tiered caches
//! - [`keys`] - Cache key composition
//! - [`config`] - Configuration options
//! - [`observability`] - Tracing setup and metrics
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod loader;
pub mod observability;
pub mod registry;

// Re-export main types
pub use cache::{
    CacheManager, CacheSettings, ComputeOptions, DynRemoteCache, MemoryRemoteCache,
    NoopRemoteCache, RemoteCache, TieredCache, TieredCacheStats,
};
pub use config::{
    CacheConfig, ExpirationMode, KeyflightConfig, LoaderConfig, LoggingConfig, NamespaceConfig,
    RedisConfig,
};
pub use error::{CacheError, ConfigError, KeyError, LoadError, RemoteCacheError};
pub use keys::CacheKey;
pub use loader::{BatchLoader, BulkFetch, Fetched, FnFetch, GroupedFetch, KeyedFetch};
pub use registry::LoaderRegistry;
