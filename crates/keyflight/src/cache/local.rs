//! In-process (L1) cache with strict LRU eviction and per-entry TTL.
//!
//! Every access, read or write, moves an entry to the most-recently-used
//! position, so reads mutate the index and are serialized with writes under
//! a single mutex. Critical sections never span an `.await`.
//!
//! Expiration is checked lazily on access and swept periodically by
//! [`LocalCache::spawn_sweeper`]. In [`ExpirationMode::Sliding`] mode a read
//! restarts the entry's TTL window; in [`ExpirationMode::Fixed`] mode the TTL
//! counts from the last write.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ExpirationMode;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Cached entry with insertion and access times.
#[derive(Debug)]
struct CachedEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
    ttl: Duration,
    weight: usize,
}

impl<V> CachedEntry<V> {
    fn expires_at(&self, mode: ExpirationMode) -> Instant {
        match mode {
            ExpirationMode::Sliding => self.last_access + self.ttl,
            ExpirationMode::Fixed => self.inserted_at + self.ttl,
        }
    }

    fn is_expired(&self, mode: ExpirationMode, now: Instant) -> bool {
        self.expires_at(mode) <= now
    }
}

/// L1 statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCacheStats {
    /// Number of entries currently held, expired ones included until swept.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Sum of entry weights.
    pub total_weight: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room for newer ones.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
}

/// Bounded in-memory cache keyed by string.
pub struct LocalCache<V> {
    entries: Mutex<LruCache<String, CachedEntry<V>>>,
    capacity: NonZeroUsize,
    default_ttl: Duration,
    mode: ExpirationMode,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> LocalCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, default_ttl: Duration, mode: ExpirationMode) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            default_ttl,
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn mode(&self) -> ExpirationMode {
        self.mode
    }

    /// Get a live entry, marking it most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.mode, now) => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Get a live entry without touching recency, TTL or counters.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .filter(|entry| !entry.is_expired(self.mode, now))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.mode, now))
    }

    /// Insert or replace an entry with unit weight.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Option<String> {
        self.insert_weighted(key, value, ttl, 1)
    }

    /// Insert or replace an entry carrying an explicit weight.
    ///
    /// Capacity is still counted in entries; the weight is only reported.
    pub fn insert_weighted(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        weight: usize,
    ) -> Option<String> {
        let key = key.into();
        let now = Instant::now();
        let entry = CachedEntry {
            value,
            inserted_at: now,
            last_access: now,
            ttl: ttl.unwrap_or(self.default_ttl),
            weight,
        };

        let mut entries = self.entries.lock();
        let replacing = entries.contains(key.as_str());
        match entries.push(key, entry) {
            Some((evicted_key, evicted)) if !replacing => {
                if evicted.is_expired(self.mode, now) {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Some(evicted_key)
            }
            _ => None,
        }
    }

    /// Remove an entry. Returns `true` if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.mode, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key.as_str());
        }

        if !expired.is_empty() {
            self.expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn stats(&self) -> LocalCacheStats {
        let (entries, total_weight) = {
            let entries = self.entries.lock();
            (entries.len(), entries.iter().map(|(_, e)| e.weight).sum())
        };
        LocalCacheStats {
            entries,
            capacity: self.capacity.get(),
            total_weight,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> LocalCache<V> {
    /// Start a background task that purges expired entries every `interval`.
    ///
    /// Intervals below 100ms are raised to 100ms. The task holds only a weak
    /// reference and exits once the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration, label: String) -> JoinHandle<()> {
        if interval < MIN_SWEEP_INTERVAL {
            tracing::warn!(
                namespace = %label,
                requested_ms = interval.as_millis() as u64,
                "Sweep interval too small, using {}ms",
                MIN_SWEEP_INTERVAL.as_millis()
            );
        }
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let weak = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(namespace = %label, removed, "Swept expired cache entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl_ms: u64, mode: ExpirationMode) -> LocalCache<String> {
        LocalCache::new(capacity, Duration::from_millis(ttl_ms), mode)
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_and_get() {
        let cache = cache(10, 1_000, ExpirationMode::Sliding);
        cache.insert("k", "v".to_string(), None);

        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = cache(3, 60_000, ExpirationMode::Sliding);
        cache.insert("a", "1".to_string(), None);
        cache.insert("b", "2".to_string(), None);
        cache.insert("c", "3".to_string(), None);

        // "a" becomes most recently used, so "b" is now the oldest.
        assert!(cache.get("a").is_some());
        let evicted = cache.insert("d", "4".to_string(), None);

        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_counts_as_use() {
        let cache = cache(2, 60_000, ExpirationMode::Sliding);
        cache.insert("a", "1".to_string(), None);
        cache.insert("b", "2".to_string(), None);
        // Rewriting "a" refreshes its recency.
        assert_eq!(cache.insert("a", "1b".to_string(), None), None);
        assert_eq!(cache.insert("c", "3".to_string(), None).as_deref(), Some("b"));
        assert_eq!(cache.peek("a").as_deref(), Some("1b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_expiration() {
        let cache = cache(10, 100, ExpirationMode::Fixed);
        cache.insert("k", "v".to_string(), None);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cache.get("k").is_some());

        // Reads do not extend a fixed TTL.
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_expiration_refreshes_on_read() {
        let cache = cache(10, 100, ExpirationMode::Sliding);
        cache.insert("k", "v".to_string(), None);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(60)).await;
            assert!(cache.get("k").is_some());
        }

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_does_not_refresh() {
        let cache = cache(10, 100, ExpirationMode::Sliding);
        cache.insert("k", "v".to_string(), None);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cache.peek("k").is_some());
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cache.peek("k").is_none());
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = cache(10, 1_000, ExpirationMode::Fixed);
        cache.insert("short", "v".to_string(), Some(Duration::from_millis(10)));
        cache.insert("long", "v".to_string(), None);

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(10, 10, ExpirationMode::Fixed);
        for i in 0..3 {
            cache.insert(format!("k{i}"), "v".to_string(), None);
        }
        cache.insert("kept", "v".to_string(), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.purge_expired(), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_dead_entries() {
        let cache = Arc::new(cache(10, 10, ExpirationMode::Fixed));
        cache.insert("k", "v".to_string(), None);
        let handle = LocalCache::spawn_sweeper(&cache, Duration::from_millis(50), "test".into());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sweep_interval_is_raised() {
        let cache = Arc::new(cache(10, 10, ExpirationMode::Fixed));
        cache.insert("k", "v".to_string(), None);
        let handle = LocalCache::spawn_sweeper(&cache, Duration::ZERO, "test".into());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!handle.is_finished());
        assert!(cache.is_empty());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_weights_and_clear() {
        let cache = cache(10, 1_000, ExpirationMode::Sliding);
        cache.insert_weighted("a", "v".to_string(), None, 5);
        cache.insert("b", "v".to_string(), None);
        assert_eq!(cache.stats().total_weight, 6);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: LocalCache<u8> = LocalCache::new(0, Duration::from_secs(1), ExpirationMode::Fixed);
        assert_eq!(cache.stats().capacity, 1);
    }
}
