//! LRU shard and the single-shard cache.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::{CacheKey, CacheStats, CacheStatsSnapshot, Loader, LoadingCache};

/// One LRU partition. `None` means caching is disabled for this shard.
pub(crate) struct Shard<K: CacheKey, V> {
    entries: Mutex<Option<LruCache<K, V>>>,
    capacity: usize,
}

impl<K: CacheKey, V: Clone> Shard<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Shard {
            entries: Mutex::new(NonZeroUsize::new(capacity).map(LruCache::new)),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, LruCache::len)
    }

    pub(crate) fn remove(&self, key: &K) {
        if let Some(entries) = self.entries.lock().as_mut() {
            entries.pop(key);
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(entries) = self.entries.lock().as_mut() {
            entries.clear();
        }
    }

    /// Look up `key`, loading it while the shard stays locked.
    pub(crate) fn get(&self, key: &K, loader: &Loader<K, V>, stats: &CacheStats) -> V {
        let mut guard = self.entries.lock();
        fetch(&mut guard, key, loader, stats)
    }

    /// Like [`Shard::get`], but gives up immediately if the shard is busy.
    pub(crate) fn try_get(
        &self,
        key: &K,
        loader: &Loader<K, V>,
        stats: &CacheStats,
    ) -> Option<V> {
        let mut guard = self.entries.try_lock()?;
        Some(fetch(&mut guard, key, loader, stats))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .as_ref()
            .is_some_and(|entries| entries.contains(key))
    }
}

fn fetch<K: CacheKey, V: Clone>(
    entries: &mut Option<LruCache<K, V>>,
    key: &K,
    loader: &Loader<K, V>,
    stats: &CacheStats,
) -> V {
    let Some(entries) = entries else {
        stats.record_miss();
        return loader(key);
    };

    if let Some(value) = entries.get(key) {
        stats.record_hit();
        return value.clone();
    }

    stats.record_miss();
    let value = loader(key);
    // put evicts the least recently used entry once the shard is full
    entries.put(key.clone(), value.clone());
    value
}

/// A single LRU cache shared by every thread through one lock.
pub struct SingleCache<K: CacheKey, V> {
    shard: Shard<K, V>,
    loader: Loader<K, V>,
    stats: CacheStats,
}

impl<K: CacheKey, V: Clone> SingleCache<K, V> {
    /// Create a cache holding at most `capacity` values.
    pub fn new(capacity: usize, loader: Loader<K, V>) -> Self {
        SingleCache {
            shard: Shard::new(capacity),
            loader,
            stats: CacheStats::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.shard.contains(key)
    }
}

impl<K: CacheKey, V> fmt::Debug for SingleCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleCache")
            .field("capacity", &self.shard.capacity)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<K, V> LoadingCache<K, V> for SingleCache<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> V {
        self.shard.get(key, &self.loader, &self.stats)
    }

    fn capacity(&self) -> usize {
        self.shard.capacity()
    }

    fn len(&self) -> usize {
        self.shard.len()
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn invalidate(&self, key: &K) {
        self.shard.remove(key);
    }

    fn clear(&self) {
        self.shard.clear();
    }
}
