use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::keys::validate_kind;
use crate::observability::parse_level;

/// Name of the namespace used when callers do not pick one.
pub const GENERAL_NAMESPACE: &str = "general";
/// Namespace for per-organization configuration lookups.
pub const ORG_CONFIG_NAMESPACE: &str = "org_config";
/// Namespace for API-key lookups.
pub const API_KEY_NAMESPACE: &str = "api_key";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyflightConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Redis (L2) configuration
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeyflightConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.loader.batch_window_ms == 0 {
            return Err("loader.batch_window_ms must be > 0".into());
        }
        if self.loader.max_batch_size == 0 {
            return Err("loader.max_batch_size must be > 0".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        for (name, ns) in &self.cache.namespaces {
            if validate_kind(name).is_err() {
                return Err(format!("cache.namespaces: invalid namespace name {name:?}"));
            }
            if ns.capacity == 0 {
                return Err(format!("cache.namespaces.{name}.capacity must be > 0"));
            }
            if ns.ttl_secs == 0 {
                return Err(format!("cache.namespaces.{name}.ttl_secs must be > 0"));
            }
        }
        if self.redis.enabled && self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if parse_level(&self.logging.level).is_err() {
            return Err(format!(
                "logging.level {:?} is not a valid filter",
                self.logging.level
            ));
        }
        Ok(())
    }
}

/// Batch loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// How long a batch collects keys before it is dispatched
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Distinct keys at which a batch is dispatched immediately
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Keep resolved results for the loader's lifetime
    #[serde(default = "default_memoize")]
    pub memoize: bool,
}

fn default_batch_window_ms() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    100
}

fn default_memoize() -> bool {
    true
}

impl LoaderConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: default_batch_window_ms(),
            max_batch_size: default_max_batch_size(),
            memoize: default_memoize(),
        }
    }
}

/// How an L1 entry's time-to-live is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationMode {
    /// TTL restarts on every read.
    #[default]
    Sliding,
    /// TTL counts from insertion (or the last `set`).
    Fixed,
}

impl std::fmt::Display for ExpirationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpirationMode::Sliding => write!(f, "sliding"),
            ExpirationMode::Fixed => write!(f, "fixed"),
        }
    }
}

/// Settings for one cache namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Local (L1) cache max entries
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Local (L1) default TTL in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// TTL in seconds for entries written to the remote (L2) tier
    #[serde(default = "default_remote_ttl_secs")]
    pub remote_ttl_secs: u64,

    #[serde(default)]
    pub expiration: ExpirationMode,
}

fn default_capacity() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_remote_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl NamespaceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn remote_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_ttl_secs)
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
            remote_ttl_secs: default_remote_ttl_secs(),
            expiration: ExpirationMode::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Interval of the background sweep that drops expired L1 entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Isolated caches keyed by namespace name
    #[serde(default = "default_namespaces")]
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_namespaces() -> BTreeMap<String, NamespaceConfig> {
    let mut namespaces = BTreeMap::new();
    namespaces.insert(GENERAL_NAMESPACE.to_string(), NamespaceConfig::default());
    namespaces.insert(
        ORG_CONFIG_NAMESPACE.to_string(),
        NamespaceConfig {
            capacity: 500,
            ttl_secs: 600,
            ..NamespaceConfig::default()
        },
    );
    namespaces.insert(
        API_KEY_NAMESPACE.to_string(),
        NamespaceConfig {
            capacity: 10_000,
            ttl_secs: 60,
            ..NamespaceConfig::default()
        },
    );
    namespaces
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            namespaces: default_namespaces(),
        }
    }
}

/// Redis configuration for the shared L2 tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (L1-only caching)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::KeyflightConfig;
    use crate::error::ConfigError;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<KeyflightConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("keyflight.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., KEYFLIGHT__LOADER__MAX_BATCH_SIZE=50
        builder = builder.add_source(
            Environment::with_prefix("KEYFLIGHT")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: KeyflightConfig = builder.build()?.try_deserialize()?;
        merged.validate().map_err(ConfigError::Invalid)?;
        Ok(merged)
    }
}
