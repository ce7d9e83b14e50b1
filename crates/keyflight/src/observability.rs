//! Tracing setup and metrics for caches and loaders.
//!
//! Hosts call [`init_from_config`] once at startup. The installed filter sits
//! behind a reload layer so [`apply_logging_level`] can change verbosity
//! without a restart.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::{KeyflightConfig, LoggingConfig};
use crate::error::ConfigError;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global subscriber with the `[logging]` level from `config`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_from_config(config: &KeyflightConfig) -> bool {
    init_tracing_with_level(&config.logging.level)
}

pub fn init_tracing() -> bool {
    init_tracing_with_level(&LoggingConfig::default().level)
}

/// Install the global subscriber with the given filter directives.
///
/// `RUST_LOG` takes precedence over `level`; a level that does not parse
/// falls back to `info`.
pub fn init_tracing_with_level(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
    installed
}

/// Replace the active filter at runtime.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if `level` does not parse, or if tracing
/// was not installed through this module.
pub fn apply_logging_level(level: &str) -> Result<(), ConfigError> {
    let filter = parse_level(level)?;
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| ConfigError::Invalid("tracing is not initialized".into()))?;
    handle
        .reload(filter)
        .map_err(|e| ConfigError::Invalid(format!("failed to reload log filter: {e}")))?;
    tracing::info!(level = %level, "Log level changed");
    Ok(())
}

pub(crate) fn parse_level(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level)
        .map_err(|e| ConfigError::Invalid(format!("logging.level {level:?}: {e}")))
}

/// Counters emitted by caches and loaders.
///
/// Recording is a no-op until the host process installs a `metrics` recorder.
pub mod metrics {
    use ::metrics::counter;

    /// Metric names as constants for consistency.
    pub mod names {
        pub const CACHE_HITS_TOTAL: &str = "keyflight_cache_hits_total";
        pub const CACHE_MISSES_TOTAL: &str = "keyflight_cache_misses_total";
        pub const CACHE_EVICTIONS_TOTAL: &str = "keyflight_cache_evictions_total";
        pub const BATCHES_TOTAL: &str = "keyflight_batches_total";
        pub const BATCH_KEYS_TOTAL: &str = "keyflight_batch_keys_total";
    }

    /// Record a cache hit for the given tier ("L1" or "L2").
    pub fn record_cache_hit(namespace: &str, tier: &'static str) {
        counter!(names::CACHE_HITS_TOTAL, "namespace" => namespace.to_string(), "tier" => tier)
            .increment(1);
    }

    /// Record a miss in both tiers.
    pub fn record_cache_miss(namespace: &str) {
        counter!(names::CACHE_MISSES_TOTAL, "namespace" => namespace.to_string()).increment(1);
    }

    pub fn record_cache_evictions(namespace: &str, count: u64) {
        counter!(names::CACHE_EVICTIONS_TOTAL, "namespace" => namespace.to_string())
            .increment(count);
    }

    /// Record one dispatched batch and the number of distinct keys it fetched.
    pub fn record_batch(keys: usize) {
        counter!(names::BATCHES_TOTAL).increment(1);
        counter!(names::BATCH_KEYS_TOTAL).increment(keys as u64);
    }
}
