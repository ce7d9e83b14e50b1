//! Namespaced collection of tiered caches.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::remote::DynRemoteCache;
use super::tiered::{CacheSettings, ComputeOptions, TieredCache, TieredCacheStats};
use crate::config::{CacheConfig, GENERAL_NAMESPACE, NamespaceConfig};
use crate::error::CacheError;

/// Isolated tiered caches, one per configured namespace.
///
/// Each namespace has its own capacity, TTL and expiration mode, so a burst
/// of writes to one cannot evict hot entries of another. All namespaces share
/// one remote backend; their keys are prefixed with the namespace name there.
///
/// Build one at startup and call [`CacheManager::shutdown`] when done; there
/// is no global instance.
pub struct CacheManager<V> {
    caches: BTreeMap<String, TieredCache<V>>,
    remote: DynRemoteCache,
}

impl<V> CacheManager<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create caches for every namespace in `config`, without sweepers.
    ///
    /// The `general` namespace is always present; it gets default settings
    /// when `config` does not list it.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Key` if a namespace name is not a valid key segment.
    pub fn new(config: &CacheConfig, remote: DynRemoteCache) -> Result<Self, CacheError> {
        let mut caches = BTreeMap::new();
        for (name, ns_config) in &config.namespaces {
            let cache = TieredCache::new(name.clone(), CacheSettings::from(ns_config), remote.clone())?;
            caches.insert(name.clone(), cache);
        }
        if !caches.contains_key(GENERAL_NAMESPACE) {
            tracing::debug!("No general namespace configured, using defaults");
            let settings = CacheSettings::from(&NamespaceConfig::default());
            let cache = TieredCache::new(GENERAL_NAMESPACE, settings, remote.clone())?;
            caches.insert(GENERAL_NAMESPACE.to_string(), cache);
        }

        tracing::info!(
            namespaces = caches.len(),
            remote = remote.mode(),
            "Cache manager initialized"
        );
        Ok(Self { caches, remote })
    }

    /// Create caches and start their background sweepers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &CacheConfig, remote: DynRemoteCache) -> Result<Self, CacheError> {
        let manager = Self::new(config, remote)?;
        manager.start_sweepers(config.sweep_interval());
        Ok(manager)
    }

    /// Add (or replace) a namespace after construction.
    pub fn add_namespace(
        &mut self,
        name: impl Into<String>,
        settings: CacheSettings,
    ) -> Result<&TieredCache<V>, CacheError> {
        let name = name.into();
        let cache = TieredCache::new(name.clone(), settings, self.remote.clone())?;
        if let Some(previous) = self.caches.insert(name.clone(), cache) {
            previous.stop_sweeper();
        }
        self.namespace(&name)
    }

    pub fn start_sweepers(&self, interval: Duration) {
        for cache in self.caches.values() {
            cache.start_sweeper(interval);
        }
    }

    /// Get the cache for a namespace.
    pub fn namespace(&self, name: &str) -> Result<&TieredCache<V>, CacheError> {
        self.caches
            .get(name)
            .ok_or_else(|| CacheError::unknown_namespace(name))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    /// Get-or-compute in the namespace named by `opts` (default `general`).
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
        let name = opts.namespace.as_deref().unwrap_or(GENERAL_NAMESPACE);
        let cache = self.namespace(name)?.clone();
        cache.get_or_compute(key, compute, opts).await
    }

    /// Get a value from a namespace's L1.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<V>, CacheError> {
        Ok(self.namespace(namespace)?.get(key))
    }

    /// Store a value in a namespace's L1 with its default TTL.
    pub fn set(&self, namespace: &str, key: impl Into<String>, value: V) -> Result<(), CacheError> {
        self.namespace(namespace)?.set(key, value);
        Ok(())
    }

    /// Remove a value from a namespace's L1. Returns `true` if it was present.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.namespace(namespace)?.delete(key))
    }

    /// Remove a value from both tiers of a namespace.
    pub async fn invalidate(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        self.namespace(namespace)?.invalidate(key).await;
        Ok(())
    }

    /// Drop every L1 entry of a namespace.
    pub fn clear(&self, namespace: &str) -> Result<(), CacheError> {
        self.namespace(namespace)?.clear();
        Ok(())
    }

    pub fn clear_all(&self) {
        for cache in self.caches.values() {
            cache.clear();
        }
    }

    pub fn stats(&self) -> Vec<TieredCacheStats> {
        self.caches.values().map(TieredCache::stats).collect()
    }

    /// Check if the shared remote tier is reachable (for health checks).
    pub async fn is_remote_available(&self) -> bool {
        self.remote.is_available().await
    }

    /// Stop background sweepers and drop every L1 entry.
    pub fn shutdown(&self) {
        for cache in self.caches.values() {
            cache.stop_sweeper();
            cache.clear();
        }
        tracing::info!("Cache manager shut down");
    }
}
