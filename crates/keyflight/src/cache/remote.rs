//! Remote (L2) cache abstraction.
//!
//! The tiered cache talks to its second tier only through [`RemoteCache`].
//! Values cross this boundary as opaque bytes; encoding is the tiered cache's
//! concern. Every failure here is advisory: callers log it and fall back to
//! L1-only behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::RemoteCacheError;

/// Trait for the shared, slower cache tier.
///
/// Implementations must be thread-safe; the tiered cache calls them from
/// spawned tasks.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Get a value by key. Returns `Ok(None)` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteCacheError>;

    /// Store a value with its own TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RemoteCacheError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError>;

    /// Check if the backend is reachable (for health checks).
    async fn is_available(&self) -> bool {
        true
    }

    /// Short label for logs and stats ("none", "memory", "redis").
    fn mode(&self) -> &'static str;
}

/// Shared handle to a remote cache backend.
pub type DynRemoteCache = Arc<dyn RemoteCache>;

/// A remote tier that stores nothing, used for L1-only deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRemoteCache;

impl NoopRemoteCache {
    pub fn shared() -> DynRemoteCache {
        Arc::new(Self)
    }
}

#[async_trait]
impl RemoteCache for NoopRemoteCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RemoteCacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), RemoteCacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), RemoteCacheError> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        false
    }

    fn mode(&self) -> &'static str {
        "none"
    }
}

struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

/// Remote tier kept in process memory.
///
/// Useful for single-node deployments that still want a longer-lived second
/// tier, and for exercising the tiered flow in tests. It can be switched
/// offline to simulate an outage.
#[derive(Default)]
pub struct MemoryRemoteCache {
    entries: DashMap<String, StoredValue>,
    offline: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
}

/// Operation counters for [`MemoryRemoteCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRemoteStats {
    pub entries: usize,
    pub gets: u64,
    pub sets: u64,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    pub fn stats(&self) -> MemoryRemoteStats {
        MemoryRemoteStats {
            entries: self.entries.len(),
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
        }
    }

    /// Drop expired entries. Runs on every `set`, so keys that are never
    /// read again do not accumulate.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn ensure_online(&self) -> Result<(), RemoteCacheError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(RemoteCacheError::unavailable("memory remote cache is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteCache for MemoryRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteCacheError> {
        self.ensure_online()?;
        self.gets.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.data.clone()));
            }
            // Entry expired, remove it
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RemoteCacheError> {
        self.ensure_online()?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.purge_expired();
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError> {
        self.ensure_online()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        !self.offline.load(Ordering::Relaxed)
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_stores_nothing() {
        let cache = NoopRemoteCache;
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.is_available().await);
        assert_eq!(cache.mode(), "none");
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_get_set_expire() {
        let cache = MemoryRemoteCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_set_purges_unread_expired_entries() {
        let cache = MemoryRemoteCache::new();
        for i in 0..5 {
            cache
                .set(&format!("once:{i}"), vec![1], Duration::from_millis(100))
                .await
                .unwrap();
        }
        assert_eq!(cache.stats().entries, 5);

        tokio::time::advance(Duration::from_millis(150)).await;
        cache.set("fresh", vec![2], Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.stats().entries, 1);
        assert!(cache.contains("fresh"));
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_memory_offline_fails() {
        let cache = MemoryRemoteCache::new();
        cache.set_online(false);

        assert!(matches!(
            cache.get("k").await,
            Err(RemoteCacheError::Unavailable { .. })
        ));
        assert!(cache.set("k", vec![1], Duration::from_secs(1)).await.is_err());
        assert!(!cache.is_available().await);

        cache.set_online(true);
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let cache = MemoryRemoteCache::new();
        cache.set("k", vec![1], Duration::from_secs(60)).await.unwrap();
        assert!(cache.contains("k"));
        cache.delete("k").await.unwrap();
        assert!(!cache.contains("k"));
        cache.delete("k").await.unwrap();
    }
}
