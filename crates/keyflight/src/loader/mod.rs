//! Batched key loading.
//!
//! This module collects concurrent `load(key)` calls made within a short
//! window and resolves them with a single bulk fetch, preventing N+1 access
//! patterns against the backing store.
//!
//! ## Overview
//!
//! - [`BatchLoader`] - Batches, deduplicates and memoizes loads for one kind of key
//! - [`BulkFetch`] - The fetch contract a loader drives
//! - [`FnFetch`], [`KeyedFetch`], [`GroupedFetch`] - Adapters from plain async closures
//!
//! ## Usage
//!
//! Loaders are cheap to clone and are usually created per request, so their
//! memo never outlives the request:
//!
//! ```ignore
//! use keyflight::loader::{BatchLoader, KeyedFetch};
//!
//! let users = BatchLoader::with_defaults(KeyedFetch::new(|ids: Vec<String>| async move {
//!     repo.users_by_ids(&ids).await
//! }));
//! let user = users.load("42".to_string()).await?;
//! ```

mod adapters;
mod batch;

pub use adapters::{FnFetch, GroupedFetch, KeyedFetch};
pub use batch::{BatchLoader, LoaderStats};

use async_trait::async_trait;

/// Result for one key of a bulk fetch.
#[derive(Debug)]
pub enum Fetched<V> {
    /// The key resolved to a value.
    Found(V),
    /// The key does not exist in the backing store.
    NotFound,
    /// The key could not be fetched. Other keys of the batch are unaffected.
    Failed(anyhow::Error),
}

impl<V> From<Option<V>> for Fetched<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(v) => Self::Found(v),
            None => Self::NotFound,
        }
    }
}

/// Fetches many keys in one call.
///
/// Implementations receive the distinct keys of a batch in first-seen order
/// and must return exactly one [`Fetched`] per key, in the same order. An
/// `Err` fails every request of the batch.
#[async_trait]
pub trait BulkFetch<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    async fn fetch(&self, keys: &[K]) -> anyhow::Result<Vec<Fetched<V>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_from_option() {
        assert!(matches!(Fetched::from(Some(1)), Fetched::Found(1)));
        assert!(matches!(Fetched::<i32>::from(None), Fetched::NotFound));
    }
}
