//! Bounded in-memory cache.
//!
//! Uses moka's concurrent cache implementation. The engine keeps compiled
//! workflow definitions here so repeated runs of the same version skip
//! re-validation.

use moka::sync::Cache;

/// Thread-safe in-memory cache with LRU-style eviction once `capacity` is exceeded.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    /// Drop every entry whose key matches `pred`.
    pub fn remove_if(
        &self,
        pred: impl Fn(&K) -> bool,
    ) {
        let keys: Vec<_> = self.entries.iter().filter(|(k, _)| pred(k)).map(|(k, _)| k).collect();
        for key in keys {
            self.entries.invalidate(key.as_ref());
        }
    }
}
