//! Redis-backed remote tier for keyflight caches.
//!
//! [`RedisRemoteCache`] implements [`RemoteCache`] over a `deadpool-redis`
//! connection pool. Use [`create_remote_cache`] at startup: it returns a Redis
//! tier when Redis is enabled and reachable, and a no-op tier otherwise, so
//! the caches gracefully fall back to L1-only mode.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use keyflight::cache::{DynRemoteCache, NoopRemoteCache, RemoteCache};
use keyflight::{RedisConfig, RemoteCacheError};
use redis::AsyncCommands;

/// Remote cache tier stored in Redis.
///
/// Values are stored with `SETEX`, so Redis expires them on its own.
/// Sub-second TTLs are rounded up to one second.
#[derive(Clone)]
pub struct RedisRemoteCache {
    pool: Pool,
}

impl RedisRemoteCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration without connecting.
    pub fn from_config(config: &RedisConfig) -> Result<Self, RemoteCacheError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| RemoteCacheError::unavailable(format!("failed to create Redis pool: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> Result<Connection, RemoteCacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| RemoteCacheError::unavailable(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteCacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| RemoteCacheError::command(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), RemoteCacheError> {
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| RemoteCacheError::command(format!("SETEX {key}: {e}")))?;
        tracing::debug!(key = %key, ttl_secs = %ttl_secs, "Redis SETEX");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| RemoteCacheError::command(format!("DEL {key}: {e}")))
    }

    async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}

/// Create the remote tier from configuration.
///
/// Falls back to [`NoopRemoteCache`] when Redis is disabled, the pool cannot
/// be built, or the first connection fails.
pub async fn create_remote_cache(config: &RedisConfig) -> DynRemoteCache {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return NoopRemoteCache::shared();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let cache = match RedisRemoteCache::from_config(config) {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return NoopRemoteCache::shared();
        }
    };

    // Test connection
    match cache.connection().await {
        Ok(_) => {
            tracing::info!("Connected to Redis successfully");
            std::sync::Arc::new(cache)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            NoopRemoteCache::shared()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_falls_back_to_noop() {
        let cache = create_remote_cache(&RedisConfig::default()).await;
        assert_eq!(cache.mode(), "none");
        assert!(!cache.is_available().await);
    }

    #[tokio::test]
    async fn test_unreachable_falls_back_to_noop() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
            timeout_ms: 200,
        };
        let cache = create_remote_cache(&config).await;
        assert_eq!(cache.mode(), "none");
    }

    #[tokio::test]
    async fn test_from_config_does_not_connect() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 3,
            timeout_ms: 200,
        };
        let cache = RedisRemoteCache::from_config(&config).unwrap();
        assert_eq!(cache.pool().status().max_size, 3);
        assert_eq!(cache.mode(), "redis");

        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(err, RemoteCacheError::Unavailable { .. }));
    }
}
