//! Window-based batch loader.
//!
//! A batch opens with the first `load` after the previous one was sealed and
//! collects distinct keys until either the batching window elapses or the
//! batch reaches `max_batch_size` distinct keys. Sealed batches are
//! dispatched on their own task so callers that stop waiting never cancel
//! the fetch for others.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use super::{BulkFetch, Fetched};
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::observability::metrics;

type LoadResult<V> = Result<Option<V>, LoadError>;

/// Requests collected between the first `load` and the dispatch trigger.
struct Batch<K, V> {
    id: u64,
    keys: IndexSet<K>,
    /// Index into `keys` plus the sender that delivers its result.
    waiters: Vec<(usize, oneshot::Sender<LoadResult<V>>)>,
}

impl<K, V> Batch<K, V> {
    fn new(id: u64) -> Self {
        Self {
            id,
            keys: IndexSet::new(),
            waiters: Vec::new(),
        }
    }
}

struct BatchState<K, V> {
    open: Option<Batch<K, V>>,
    next_id: u64,
}

struct LoaderInner<K, V> {
    fetcher: Arc<dyn BulkFetch<K, V>>,
    window: Duration,
    max_batch_size: usize,
    memoize: bool,
    state: Mutex<BatchState<K, V>>,
    memo: DashMap<K, Option<V>>,
    batches: AtomicU64,
    keys_fetched: AtomicU64,
    memo_hits: AtomicU64,
}

/// Loader statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Bulk fetch calls issued.
    pub batches: u64,
    /// Distinct keys passed to the fetcher across all batches.
    pub keys_fetched: u64,
    /// Loads answered from the memo.
    pub memo_hits: u64,
    /// Keys currently memoized.
    pub memo_entries: usize,
}

/// Collects concurrent loads into bulk fetches.
///
/// Cloning is cheap and clones share batches and memo.
pub struct BatchLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V> fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoader")
            .field("window", &self.inner.window)
            .field("max_batch_size", &self.inner.max_batch_size)
            .field("memoize", &self.inner.memoize)
            .field("memo_entries", &self.inner.memo.len())
            .finish()
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a loader with the given window and size settings.
    ///
    /// A `max_batch_size` of zero is treated as one.
    pub fn new(fetcher: impl BulkFetch<K, V> + 'static, config: &LoaderConfig) -> Self {
        Self::from_shared(Arc::new(fetcher), config)
    }

    /// Creates a loader with the default 10ms window and 100-key batches.
    pub fn with_defaults(fetcher: impl BulkFetch<K, V> + 'static) -> Self {
        Self::new(fetcher, &LoaderConfig::default())
    }

    /// Creates a loader around a fetcher shared with other loaders.
    pub fn from_shared(fetcher: Arc<dyn BulkFetch<K, V>>, config: &LoaderConfig) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                window: config.batch_window(),
                max_batch_size: config.max_batch_size.max(1),
                memoize: config.memoize,
                state: Mutex::new(BatchState {
                    open: None,
                    next_id: 0,
                }),
                memo: DashMap::new(),
                batches: AtomicU64::new(0),
                keys_fetched: AtomicU64::new(0),
                memo_hits: AtomicU64::new(0),
            }),
        }
    }

    /// Load one key. `Ok(None)` means the key does not exist.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn load(&self, key: K) -> Result<Option<V>, LoadError> {
        if let Some(hit) = self.inner.memo.get(&key) {
            self.inner.memo_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.value().clone());
        }

        let rx = LoaderInner::enqueue(&self.inner, key);
        rx.await.map_err(|_| LoadError::Dropped)?
    }

    /// Load several keys, returning one result per key in input order.
    pub async fn load_many(&self, keys: impl IntoIterator<Item = K>) -> Vec<Result<Option<V>, LoadError>> {
        futures_util::future::join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Seed the memo with a known value. Existing entries are kept.
    pub fn prime(&self, key: K, value: V) {
        self.inner.memo.entry(key).or_insert(Some(value));
    }

    /// Forget the memoized result for one key.
    pub fn clear(&self, key: &K) {
        self.inner.memo.remove(key);
    }

    /// Forget every memoized result.
    pub fn clear_all(&self) {
        self.inner.memo.clear();
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            batches: self.inner.batches.load(Ordering::Relaxed),
            keys_fetched: self.inner.keys_fetched.load(Ordering::Relaxed),
            memo_hits: self.inner.memo_hits.load(Ordering::Relaxed),
            memo_entries: self.inner.memo.len(),
        }
    }
}

impl<K, V> LoaderInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Add a request to the open batch, scheduling its dispatch as needed.
    fn enqueue(this: &Arc<Self>, key: K) -> oneshot::Receiver<LoadResult<V>> {
        let (tx, rx) = oneshot::channel();

        let mut guard = this.state.lock();
        let state = &mut *guard;
        let next_id = state.next_id;
        let batch = state.open.get_or_insert_with(|| Batch::new(next_id));
        let opened = batch.id == next_id;
        if opened {
            state.next_id += 1;
        }

        let (index, _) = batch.keys.insert_full(key);
        batch.waiters.push((index, tx));
        let batch_id = batch.id;

        if batch.keys.len() >= this.max_batch_size {
            // Full: seal now so later loads open a fresh batch.
            let sealed = state.open.take();
            drop(guard);
            if let Some(sealed) = sealed {
                let inner = Arc::clone(this);
                tokio::spawn(async move { inner.dispatch(sealed).await });
            }
        } else if opened {
            drop(guard);
            let inner = Arc::clone(this);
            tokio::spawn(async move {
                tokio::time::sleep(inner.window).await;
                let sealed = {
                    let mut state = inner.state.lock();
                    if state.open.as_ref().is_some_and(|b| b.id == batch_id) {
                        state.open.take()
                    } else {
                        // Already sealed by the size cap.
                        None
                    }
                };
                if let Some(sealed) = sealed {
                    inner.dispatch(sealed).await;
                }
            });
        }

        rx
    }

    #[instrument(skip(self, batch), fields(batch_id = batch.id, key_count = batch.keys.len()))]
    async fn dispatch(&self, batch: Batch<K, V>) {
        let Batch { keys, waiters, .. } = batch;
        if keys.is_empty() {
            return;
        }
        let keys: Vec<K> = keys.into_iter().collect();

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.keys_fetched
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        metrics::record_batch(keys.len());
        debug!(waiters = waiters.len(), "Dispatching batch");

        let results: Vec<LoadResult<V>> = match self.fetcher.fetch(&keys).await {
            Err(e) => {
                warn!(error = %e, "Bulk fetch failed");
                vec![Err(LoadError::fetch(e)); keys.len()]
            }
            Ok(fetched) if fetched.len() != keys.len() => {
                warn!(
                    expected = keys.len(),
                    actual = fetched.len(),
                    "Bulk fetch returned misaligned results"
                );
                let err = LoadError::LengthMismatch {
                    expected: keys.len(),
                    actual: fetched.len(),
                };
                vec![Err(err); keys.len()]
            }
            Ok(fetched) => keys
                .iter()
                .zip(fetched)
                .map(|(key, fetched)| self.settle(key, fetched))
                .collect(),
        };

        for (index, tx) in waiters {
            // The caller may have stopped waiting.
            let _ = tx.send(results[index].clone());
        }
    }

    fn settle(&self, key: &K, fetched: Fetched<V>) -> LoadResult<V> {
        let value = match fetched {
            Fetched::Found(value) => Some(value),
            Fetched::NotFound => None,
            Fetched::Failed(e) => return Err(LoadError::Key(Arc::new(e))),
        };
        if self.memoize {
            self.memo.insert(key.clone(), value.clone());
        }
        Ok(value)
    }
}
