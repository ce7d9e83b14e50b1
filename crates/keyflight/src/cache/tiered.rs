//! Two-tier cache with get-or-compute and single-flight de-duplication.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::local::{LocalCache, LocalCacheStats};
use super::remote::{DynRemoteCache, NoopRemoteCache};
use super::singleflight::{FlightGuard, FlightResult, FlightSlot, Singleflight};
use crate::config::{ExpirationMode, NamespaceConfig};
use crate::error::{CacheError, KeyError};
use crate::keys::CacheKey;
use crate::observability::metrics;

/// Capacity and expiry settings for one tiered cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of L1 entries.
    pub capacity: usize,
    /// Default L1 time-to-live.
    pub ttl: Duration,
    /// Time-to-live for values written to L2.
    pub remote_ttl: Duration,
    pub expiration: ExpirationMode,
}

impl CacheSettings {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_remote_ttl(mut self, remote_ttl: Duration) -> Self {
        self.remote_ttl = remote_ttl;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: ExpirationMode) -> Self {
        self.expiration = expiration;
        self
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        (&NamespaceConfig::default()).into()
    }
}

impl From<&NamespaceConfig> for CacheSettings {
    fn from(config: &NamespaceConfig) -> Self {
        Self {
            capacity: config.capacity,
            ttl: config.ttl(),
            remote_ttl: config.remote_ttl(),
            expiration: config.expiration,
        }
    }
}

/// Per-call options for [`TieredCache::get_or_compute`].
#[derive(Debug, Clone, Default)]
pub struct ComputeOptions {
    /// L1 TTL for the computed value; the namespace default when `None`.
    pub ttl: Option<Duration>,
    /// L2 TTL for the computed value; the namespace default when `None`.
    pub remote_ttl: Option<Duration>,
    /// Namespace to use when going through a
    /// [`CacheManager`](super::CacheManager); ignored by a single cache.
    pub namespace: Option<String>,
}

impl ComputeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_remote_ttl(mut self, ttl: Duration) -> Self {
        self.remote_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Statistics for one tiered cache.
#[derive(Debug, Clone)]
pub struct TieredCacheStats {
    pub namespace: String,
    /// Remote backend label ("none", "memory", "redis").
    pub remote_mode: &'static str,
    pub l1: LocalCacheStats,
    /// Lookups answered by L2 and promoted into L1.
    pub l2_hits: u64,
    /// Invocations of a compute function.
    pub computes: u64,
    /// Compute invocations that failed.
    pub compute_failures: u64,
    /// Computations currently in flight.
    pub in_flight: usize,
}

impl TieredCacheStats {
    /// Share of L1 lookups answered from either tier, as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.l1.hits + self.l1.misses;
        if total == 0 {
            0.0
        } else {
            ((self.l1.hits + self.l2_hits) as f64 / total as f64) * 100.0
        }
    }
}

/// Two-tier cache: bounded in-process L1 in front of a [`RemoteCache`](super::RemoteCache) L2.
///
/// ## Lookup Order
///
/// ```text
/// get_or_compute → L1 → L2 → compute
///                   ↓     ↓       ↓
///                 return  promote  write L1, then L2 (best effort)
/// ```
///
/// Concurrent misses for one key share a single computation. The
/// computation runs on its own task, so a caller that stops waiting does not
/// cancel it for the others.
///
/// Cloning is cheap and shares the underlying state.
pub struct TieredCache<V> {
    inner: Arc<TieredInner<V>>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TieredInner<V> {
    namespace: String,
    remote_prefix: String,
    settings: CacheSettings,
    local: Arc<LocalCache<V>>,
    remote: DynRemoteCache,
    flights: Arc<Singleflight<V>>,
    l2_hits: AtomicU64,
    computes: AtomicU64,
    compute_failures: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Where a resolved value came from.
enum Resolved<V> {
    Cached(V),
    Computed(V),
}

impl<V> TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a tiered cache for `namespace` backed by `remote`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKind` if the namespace name is not a valid
    /// key segment.
    pub fn new(
        namespace: impl Into<String>,
        settings: CacheSettings,
        remote: DynRemoteCache,
    ) -> Result<Self, KeyError> {
        let namespace = namespace.into();
        let remote_prefix = CacheKey::kind_prefix(&namespace)?;

        Ok(Self {
            inner: Arc::new(TieredInner {
                local: Arc::new(LocalCache::new(
                    settings.capacity,
                    settings.ttl,
                    settings.expiration,
                )),
                namespace,
                remote_prefix,
                settings,
                remote,
                flights: Arc::new(Singleflight::new()),
                l2_hits: AtomicU64::new(0),
                computes: AtomicU64::new(0),
                compute_failures: AtomicU64::new(0),
                sweeper: Mutex::new(None),
            }),
        })
    }

    /// Create a cache without a second tier.
    pub fn local_only(namespace: impl Into<String>, settings: CacheSettings) -> Result<Self, KeyError> {
        Self::new(namespace, settings, NoopRemoteCache::shared())
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Get a value, computing it at most once across concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Compute` with the compute function's failure (not
    /// cached), or `CacheError::ComputeAborted` if the computation panicked.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
        opts: ComputeOptions,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        if let Some(value) = self.inner.local.get(key) {
            debug!(namespace = %self.inner.namespace, key = %key, "cache hit (L1)");
            metrics::record_cache_hit(&self.inner.namespace, "L1");
            return Ok(value);
        }

        let mut rx = match self.inner.flights.acquire(key) {
            FlightSlot::Follower(rx) => {
                debug!(namespace = %self.inner.namespace, key = %key, "joining in-flight computation");
                rx
            }
            FlightSlot::Leader(tx) => {
                let rx = tx.subscribe();
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                tokio::spawn(async move { inner.resolve(key, tx, compute, opts).await });
                rx
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(CacheError::ComputeAborted),
        }
    }

    /// Get a value from L1 only.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.local.get(key)
    }

    /// Store a value in L1 with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, None);
    }

    /// Store a value in L1, optionally overriding the TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if let Some(evicted) = self.inner.local.insert(key, value, ttl) {
            debug!(namespace = %self.inner.namespace, key = %evicted, "evicted least recently used entry");
            metrics::record_cache_evictions(&self.inner.namespace, 1);
        }
    }

    /// Remove a value from L1. Returns `true` if it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.local.remove(key)
    }

    /// Remove a value from both tiers.
    ///
    /// L2 failures are logged and otherwise ignored.
    pub async fn invalidate(&self, key: &str) {
        self.inner.local.remove(key);
        let remote_key = self.inner.remote_key(key);
        if let Err(e) = self.inner.remote.delete(&remote_key).await {
            warn!(namespace = %self.inner.namespace, key = %key, error = %e, "remote cache DEL error");
        } else {
            debug!(namespace = %self.inner.namespace, key = %key, "cache invalidated (L1+L2)");
        }
    }

    /// Drop every L1 entry.
    pub fn clear(&self) {
        self.inner.local.clear();
    }

    /// Remove expired L1 entries now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.local.purge_expired()
    }

    /// Start the background sweeper, replacing any running one.
    pub fn start_sweeper(&self, interval: Duration) {
        let handle = LocalCache::spawn_sweeper(
            &self.inner.local,
            interval,
            self.inner.namespace.clone(),
        );
        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Check if the remote tier is reachable.
    pub async fn is_remote_available(&self) -> bool {
        self.inner.remote.is_available().await
    }

    pub fn stats(&self) -> TieredCacheStats {
        TieredCacheStats {
            namespace: self.inner.namespace.clone(),
            remote_mode: self.inner.remote.mode(),
            l1: self.inner.local.stats(),
            l2_hits: self.inner.l2_hits.load(Ordering::Relaxed),
            computes: self.inner.computes.load(Ordering::Relaxed),
            compute_failures: self.inner.compute_failures.load(Ordering::Relaxed),
            in_flight: self.inner.flights.len(),
        }
    }
}

impl<V> TieredInner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn remote_key(&self, key: &str) -> String {
        format!("{}{key}", self.remote_prefix)
    }

    /// Leader side of a flight: resolve, release the slot, then broadcast.
    async fn resolve<F, Fut>(
        self: Arc<Self>,
        key: String,
        tx: broadcast::Sender<FlightResult<V>>,
        compute: F,
        opts: ComputeOptions,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let guard = FlightGuard::new(Arc::clone(&self.flights), key.clone());
        let outcome = self.lookup_or_compute(&key, compute, &opts).await;
        guard.complete();

        let (result, write_back) = match outcome {
            Ok(Resolved::Cached(value)) => (Ok(value), None),
            Ok(Resolved::Computed(value)) => (Ok(value.clone()), Some(value)),
            Err(e) => (Err(e), None),
        };
        // No receivers left means every caller stopped waiting.
        let _ = tx.send(result);

        if let Some(value) = write_back {
            self.write_remote(&key, &value, opts.remote_ttl).await;
        }
    }

    async fn lookup_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
        opts: &ComputeOptions,
    ) -> Result<Resolved<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        // A previous flight may have landed between the caller's miss and this slot.
        if let Some(value) = self.local.peek(key) {
            return Ok(Resolved::Cached(value));
        }

        if let Some(value) = self.read_remote(key).await {
            debug!(namespace = %self.namespace, key = %key, "cache hit (L2)");
            metrics::record_cache_hit(&self.namespace, "L2");
            self.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.insert_local(key, value.clone(), opts.ttl);
            return Ok(Resolved::Cached(value));
        }

        debug!(namespace = %self.namespace, key = %key, "cache miss");
        metrics::record_cache_miss(&self.namespace);
        self.computes.fetch_add(1, Ordering::Relaxed);

        match compute().await {
            Ok(value) => {
                self.insert_local(key, value.clone(), opts.ttl);
                Ok(Resolved::Computed(value))
            }
            Err(e) => {
                self.compute_failures.fetch_add(1, Ordering::Relaxed);
                warn!(namespace = %self.namespace, key = %key, error = %e, "compute failed");
                Err(CacheError::compute(e))
            }
        }
    }

    fn insert_local(&self, key: &str, value: V, ttl: Option<Duration>) {
        if let Some(evicted) = self.local.insert(key, value, ttl) {
            debug!(namespace = %self.namespace, key = %evicted, "evicted least recently used entry");
            metrics::record_cache_evictions(&self.namespace, 1);
        }
    }

    async fn read_remote(&self, key: &str) -> Option<V> {
        let remote_key = self.remote_key(key);
        match self.remote.get(&remote_key).await {
            Ok(Some(bytes)) => match rmp_serde::from_slice::<V>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(namespace = %self.namespace, key = %key, error = %e, "failed to decode remote cache value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(namespace = %self.namespace, key = %key, error = %e, "remote cache GET error");
                None
            }
        }
    }

    async fn write_remote(&self, key: &str, value: &V, ttl: Option<Duration>) {
        let bytes = match rmp_serde::to_vec_named(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(namespace = %self.namespace, key = %key, error = %e, "failed to encode value for remote cache");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.settings.remote_ttl);
        let remote_key = self.remote_key(key);
        match self.remote.set(&remote_key, bytes, ttl).await {
            Ok(()) => {
                debug!(namespace = %self.namespace, key = %key, ttl_secs = ttl.as_secs(), "cache set (L1+L2)")
            }
            Err(e) => {
                warn!(namespace = %self.namespace, key = %key, error = %e, "remote cache SET error")
            }
        }
    }
}

impl<V> Drop for TieredInner<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::{MemoryRemoteCache, RemoteCache};
    use std::sync::atomic::AtomicUsize;

    fn local_cache(capacity: usize) -> TieredCache<String> {
        TieredCache::local_only("test", CacheSettings::new(capacity, Duration::from_secs(60)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_compute_on_miss_then_hit() {
        let cache = local_cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_compute(
                    "x",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("v1".to_string())
                    },
                    ComputeOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(value, "v1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().computes, 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = local_cache(10);

        let err = cache
            .get_or_compute(
                "x",
                || async { Err::<String, _>(anyhow::anyhow!("db down")) },
                ComputeOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Compute(_)));
        assert!(cache.get("x").is_none());

        let value = cache
            .get_or_compute("x", || async { Ok("v2".to_string()) }, ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "v2");
        assert_eq!(cache.stats().compute_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_leader_does_not_cancel_compute() {
        let cache = local_cache(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let compute = |calls: Arc<AtomicUsize>, value: &'static str| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(value.to_string())
            }
        };

        let leader = {
            let cache = cache.clone();
            let compute = compute(Arc::clone(&calls), "v1");
            tokio::spawn(async move {
                cache
                    .get_or_compute("x", compute, ComputeOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.stats().in_flight, 1);
        leader.abort();

        let value = cache
            .get_or_compute("x", compute(Arc::clone(&calls), "v2"), ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("x").as_deref(), Some("v1"));
    }

    async fn exploding() -> anyhow::Result<String> {
        panic!("compute exploded")
    }

    #[tokio::test]
    async fn test_panicking_compute_aborts_waiters() {
        let cache = local_cache(10);

        let err = cache
            .get_or_compute("x", exploding, ComputeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ComputeAborted));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_l2_hit_is_promoted() {
        let remote = Arc::new(MemoryRemoteCache::new());
        let cache: TieredCache<String> = TieredCache::new(
            "general",
            CacheSettings::new(10, Duration::from_secs(60)),
            remote.clone(),
        )
        .unwrap();

        let bytes = rmp_serde::to_vec_named(&"from-l2".to_string()).unwrap();
        remote
            .set("general:k", bytes, Duration::from_secs(60))
            .await
            .unwrap();

        let value = cache
            .get_or_compute(
                "k",
                || async { Err::<String, _>(anyhow::anyhow!("must not compute")) },
                ComputeOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(value, "from-l2");
        assert_eq!(cache.get("k").as_deref(), Some("from-l2"));
        assert_eq!(cache.stats().l2_hits, 1);
        assert_eq!(cache.stats().computes, 0);
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_local() {
        let remote = Arc::new(MemoryRemoteCache::new());
        remote.set_online(false);
        let cache: TieredCache<String> = TieredCache::new(
            "general",
            CacheSettings::new(10, Duration::from_secs(60)),
            remote.clone(),
        )
        .unwrap();

        let value = cache
            .get_or_compute("k", || async { Ok("v".to_string()) }, ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert!(!cache.is_remote_available().await);
    }

    #[tokio::test]
    async fn test_invalidate_removes_both_tiers() {
        let remote = Arc::new(MemoryRemoteCache::new());
        let cache: TieredCache<String> = TieredCache::new(
            "general",
            CacheSettings::new(10, Duration::from_secs(60)),
            remote.clone(),
        )
        .unwrap();

        cache
            .get_or_compute("k", || async { Ok("v".to_string()) }, ComputeOptions::default())
            .await
            .unwrap();
        // The L2 write happens after the result is delivered.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(remote.contains("general:k"));

        cache.invalidate("k").await;
        assert!(cache.get("k").is_none());
        assert!(!remote.contains("general:k"));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result: Result<TieredCache<String>, _> =
            TieredCache::local_only("not valid", CacheSettings::default());
        assert!(matches!(result, Err(KeyError::InvalidKind(_))));
    }

    #[test]
    fn test_settings_from_namespace_config() {
        let config = NamespaceConfig {
            capacity: 7,
            ttl_secs: 30,
            remote_ttl_secs: 90,
            expiration: ExpirationMode::Fixed,
        };
        let settings = CacheSettings::from(&config);
        assert_eq!(settings.capacity, 7);
        assert_eq!(settings.ttl, Duration::from_secs(30));
        assert_eq!(settings.remote_ttl, Duration::from_secs(90));
        assert_eq!(settings.expiration, ExpirationMode::Fixed);
    }
}
