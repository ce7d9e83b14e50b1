//! Per-request collection of loaders keyed by entity kind.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::error::{KeyError, LoadError};
use crate::keys::validate_kind;
use crate::loader::{BatchLoader, BulkFetch, LoaderStats};

/// Collection of batch loaders for one request scope.
///
/// Each entity kind ("user", "org", ...) gets its own [`BatchLoader`], so
/// loads of different kinds never share a batch. Create one registry per
/// request to keep memoized results from leaking across requests.
pub struct LoaderRegistry<V> {
    config: LoaderConfig,
    loaders: HashMap<String, BatchLoader<String, V>>,
}

impl<V> Clone for LoaderRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            loaders: self.loaders.clone(),
        }
    }
}

impl<V> std::fmt::Debug for LoaderRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.loaders.keys().collect();
        kinds.sort();
        f.debug_struct("LoaderRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl<V> LoaderRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            loaders: HashMap::new(),
        }
    }

    /// Register the fetcher for an entity kind, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKind` if `kind` is not a valid key kind.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        fetcher: impl BulkFetch<String, V> + 'static,
    ) -> Result<&mut Self, KeyError> {
        self.register_shared(kind, Arc::new(fetcher))
    }

    /// Register a fetcher that is shared with other registries.
    pub fn register_shared(
        &mut self,
        kind: impl Into<String>,
        fetcher: Arc<dyn BulkFetch<String, V>>,
    ) -> Result<&mut Self, KeyError> {
        let kind = kind.into();
        validate_kind(&kind)?;
        let loader = BatchLoader::from_shared(fetcher, &self.config);
        self.loaders.insert(kind, loader);
        Ok(self)
    }

    pub fn loader(&self, kind: &str) -> Result<&BatchLoader<String, V>, LoadError> {
        self.loaders
            .get(kind)
            .ok_or_else(|| LoadError::unknown_kind(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    /// Load one entity by kind and id.
    pub async fn load(&self, kind: &str, id: impl Into<String>) -> Result<Option<V>, LoadError> {
        self.loader(kind)?.load(id.into()).await
    }

    /// Load several entities of one kind, one result per id in input order.
    pub async fn load_many<I, S>(&self, kind: &str, ids: I) -> Vec<Result<Option<V>, LoadError>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.loader(kind) {
            Ok(loader) => loader.load_many(ids.into_iter().map(Into::into)).await,
            Err(e) => ids.into_iter().map(|_| Err(e.clone())).collect(),
        }
    }

    /// Forget memoized results of every loader.
    pub fn clear_all(&self) {
        for loader in self.loaders.values() {
            loader.clear_all();
        }
    }

    pub fn stats(&self) -> HashMap<String, LoaderStats> {
        self.loaders
            .iter()
            .map(|(kind, loader)| (kind.clone(), loader.stats()))
            .collect()
    }
}

impl<V> Default for LoaderRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}
