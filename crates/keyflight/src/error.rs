//! Error types for loaders, caches and key construction.
//!
//! Errors that are delivered to several waiters at once (a failed batch, a
//! failed shared computation) carry their source behind an `Arc` so every
//! waiter observes the same failure.

use std::sync::Arc;

/// Errors returned by [`BatchLoader::load`](crate::loader::BatchLoader::load).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The bulk fetch failed as a whole; every request in the batch sees it.
    #[error("Bulk fetch failed: {0}")]
    Fetch(Arc<anyhow::Error>),

    /// The bulk fetch reported a failure for this particular key.
    #[error("Fetch failed for key: {0}")]
    Key(Arc<anyhow::Error>),

    /// The fetcher returned a result sequence not aligned to its input.
    #[error("Bulk fetch returned {actual} results for {expected} keys")]
    LengthMismatch {
        /// Number of distinct keys passed to the fetcher.
        expected: usize,
        /// Number of results the fetcher returned.
        actual: usize,
    },

    /// The batch was dropped before a result was delivered.
    #[error("Batch dispatch was dropped before completion")]
    Dropped,

    /// No loader is registered for the requested entity kind.
    #[error("No loader registered for kind: {0}")]
    UnknownKind(String),
}

impl LoadError {
    /// Creates a new `Fetch` error.
    #[must_use]
    pub fn fetch(error: anyhow::Error) -> Self {
        Self::Fetch(Arc::new(error))
    }

    /// Creates a new `UnknownKind` error.
    #[must_use]
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind(kind.into())
    }

    /// Returns `true` if the failure came from the fetch itself and a retry
    /// by the caller may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Key(_) | Self::Dropped)
    }
}

/// Errors returned by tiered cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The compute function failed. The failure is not cached.
    #[error("Compute failed: {0}")]
    Compute(Arc<anyhow::Error>),

    /// The compute task panicked or was aborted before producing a value.
    #[error("Compute task aborted before completion")]
    ComputeAborted,

    /// The requested namespace is not configured.
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    /// The key could not be constructed.
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl CacheError {
    /// Creates a new `Compute` error.
    #[must_use]
    pub fn compute(error: anyhow::Error) -> Self {
        Self::Compute(Arc::new(error))
    }

    /// Creates a new `UnknownNamespace` error.
    #[must_use]
    pub fn unknown_namespace(namespace: impl Into<String>) -> Self {
        Self::UnknownNamespace(namespace.into())
    }

    /// Returns `true` if this error came from the compute function.
    #[must_use]
    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute(_) | Self::ComputeAborted)
    }
}

/// Errors raised by a [`RemoteCache`](crate::cache::RemoteCache) backend.
///
/// These never reach callers of the tiered cache; they are logged and the
/// operation degrades to L1-only behavior.
#[derive(Debug, thiserror::Error)]
pub enum RemoteCacheError {
    /// The backend could not be reached.
    #[error("Remote cache unavailable: {message}")]
    Unavailable {
        /// Description of the connection failure.
        message: String,
    },

    /// The backend rejected or failed a command.
    #[error("Remote cache command failed: {message}")]
    Command {
        /// Description of the command failure.
        message: String,
    },

    /// A value could not be encoded or decoded.
    #[error("Remote cache codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },
}

impl RemoteCacheError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a new `Codec` error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

/// Errors raised while composing or parsing cache keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The kind (or namespace) segment contains characters outside `[A-Za-z0-9_.-]`.
    #[error("Invalid key kind: {0:?}")]
    InvalidKind(String),

    /// The identifier segment is empty.
    #[error("Key identifier must not be empty")]
    EmptyId,

    /// A rendered key could not be parsed back into its parts.
    #[error("Malformed key: {0:?}")]
    Malformed(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration sources could not be merged or deserialized.
    #[error("Config build error: {0}")]
    Build(#[from] config::ConfigError),

    /// The configuration was loaded but failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::LengthMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Bulk fetch returned 2 results for 3 keys");

        let err = LoadError::fetch(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "Bulk fetch failed: connection reset");
        assert!(err.is_transient());
        assert!(!LoadError::unknown_kind("user").is_transient());
    }

    #[test]
    fn test_cache_error_clones_share_source() {
        let err = CacheError::compute(anyhow::anyhow!("boom"));
        let cloned = err.clone();
        match (&err, &cloned) {
            (CacheError::Compute(a), CacheError::Compute(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected compute errors"),
        }
        assert!(err.is_compute());
    }

    #[test]
    fn test_key_error_converts_into_cache_error() {
        let err: CacheError = KeyError::EmptyId.into();
        assert!(matches!(err, CacheError::Key(KeyError::EmptyId)));
        assert_eq!(err.to_string(), "Key identifier must not be empty");
    }
}
