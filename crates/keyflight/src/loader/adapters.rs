//! Adapters turning async closures into [`BulkFetch`] implementations.
//!
//! Most stores answer "give me these ids" with rows in arbitrary order and
//! silently skip ids they do not have. [`KeyedFetch`] and [`GroupedFetch`]
//! realign such rows to the batch's key order so fetch code never deals with
//! positions.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::{BulkFetch, Fetched};

/// Wraps a closure that already returns results aligned to its keys.
pub struct FnFetch<F, K, V> {
    f: F,
    _marker: PhantomData<fn(Vec<K>) -> V>,
}

impl<F, Fut, K, V> FnFetch<F, K, V>
where
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<Fetched<V>>>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, K, V> BulkFetch<K, V> for FnFetch<F, K, V>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<Fetched<V>>>> + Send + 'static,
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    async fn fetch(&self, keys: &[K]) -> anyhow::Result<Vec<Fetched<V>>> {
        (self.f)(keys.to_vec()).await
    }
}

/// Wraps a closure returning `(key, value)` rows in any order.
///
/// Keys without a row resolve to [`Fetched::NotFound`]. If a key appears in
/// several rows the last one wins.
pub struct KeyedFetch<F, K, V> {
    f: F,
    _marker: PhantomData<fn(Vec<K>) -> V>,
}

impl<F, Fut, K, V> KeyedFetch<F, K, V>
where
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<(K, V)>>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, K, V> BulkFetch<K, V> for KeyedFetch<F, K, V>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<(K, V)>>> + Send + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    async fn fetch(&self, keys: &[K]) -> anyhow::Result<Vec<Fetched<V>>> {
        let rows = (self.f)(keys.to_vec()).await?;
        let mut by_key: HashMap<K, V> = rows.into_iter().collect();

        Ok(keys
            .iter()
            .map(|key| Fetched::from(by_key.remove(key)))
            .collect())
    }
}

/// Wraps a one-to-many closure returning `(parent_key, child)` rows.
///
/// Every parent resolves to the list of its children, in row order. A parent
/// with no rows resolves to an empty list rather than "not found".
pub struct GroupedFetch<F, K, C> {
    f: F,
    _marker: PhantomData<fn(Vec<K>) -> C>,
}

impl<F, Fut, K, C> GroupedFetch<F, K, C>
where
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<(K, C)>>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, K, C> BulkFetch<K, Vec<C>> for GroupedFetch<F, K, C>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<(K, C)>>> + Send + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Send + 'static,
{
    async fn fetch(&self, keys: &[K]) -> anyhow::Result<Vec<Fetched<Vec<C>>>> {
        let rows = (self.f)(keys.to_vec()).await?;
        let mut groups: HashMap<K, Vec<C>> = HashMap::with_capacity(keys.len());
        for (parent, child) in rows {
            groups.entry(parent).or_default().push(child);
        }

        Ok(keys
            .iter()
            .map(|key| Fetched::Found(groups.remove(key).unwrap_or_default()))
            .collect())
    }
}
