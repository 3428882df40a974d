//! Multi-shard cache strategies.

use std::fmt;

use super::single::Shard;
use super::{CacheKey, CacheStats, CacheStatsSnapshot, Loader, LoadingCache, shard_capacity};

struct Shards<K: CacheKey, V> {
    shards: Vec<Shard<K, V>>,
    loader: Loader<K, V>,
    stats: CacheStats,
    shard_capacity: usize,
}

impl<K: CacheKey, V: Clone> Shards<K, V> {
    fn new(capacity: usize, shards: usize, loader: Loader<K, V>) -> Self {
        let count = shards.max(1);
        let per_shard = shard_capacity(capacity, count);
        Shards {
            shards: (0..count).map(|_| Shard::new(per_shard)).collect(),
            loader,
            stats: CacheStats::default(),
            shard_capacity: per_shard,
        }
    }

    /// Ring position of the shard that owns `key`.
    fn owner(&self, key: &K) -> usize {
        let width = self.shard_capacity.max(1) as u64;
        ((key.ordinal() / width) % self.count() as u64) as usize
    }

    fn capacity(&self) -> usize {
        self.shard_capacity * self.count()
    }

    fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    fn clear(&self) {
        self.shards.iter().for_each(Shard::clear);
    }
}

impl<K: CacheKey, V> Shards<K, V> {
    fn count(&self) -> usize {
        self.shards.len()
    }

    fn fmt_as(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(name)
            .field("shards", &self.count())
            .field("shard_capacity", &self.shard_capacity)
            .field("stats", &self.stats)
            .finish()
    }
}

macro_rules! delegate_loading_cache {
    ($ty:ident) => {
        impl<K: CacheKey, V> fmt::Debug for $ty<K, V> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.inner.fmt_as(stringify!($ty), f)
            }
        }

        impl<K, V> LoadingCache<K, V> for $ty<K, V>
        where
            K: CacheKey,
            V: Clone + Send + Sync,
        {
            fn get(&self, key: &K) -> V {
                self.lookup(key)
            }

            fn capacity(&self) -> usize {
                self.inner.capacity()
            }

            fn len(&self) -> usize {
                self.inner.len()
            }

            fn stats(&self) -> CacheStatsSnapshot {
                self.inner.stats.snapshot()
            }

            fn invalidate(&self, key: &K) {
                self.inner.shards.iter().for_each(|shard| shard.remove(key));
            }

            fn clear(&self) {
                self.inner.clear()
            }
        }
    };
}

/// One shard per rayon worker thread.
///
/// A worker only ever touches its own shard, so locks are never contended
/// inside the pool. Threads outside any rayon pool share shard 0.
pub struct PerThreadCache<K: CacheKey, V> {
    inner: Shards<K, V>,
}

impl<K: CacheKey, V: Clone> PerThreadCache<K, V> {
    /// `threads` should match the size of the pool that will call `get`.
    pub fn new(capacity: usize, threads: usize, loader: Loader<K, V>) -> Self {
        PerThreadCache {
            inner: Shards::new(capacity, threads, loader),
        }
    }

    fn lookup(&self, key: &K) -> V {
        let slot = rayon::current_thread_index().unwrap_or(0) % self.inner.count();
        self.inner.shards[slot].get(key, &self.inner.loader, &self.inner.stats)
    }
}

delegate_loading_cache!(PerThreadCache);

/// Shards own contiguous key ranges of `capacity / shards` keys, assigned
/// round-robin around a ring. Each shard is serialized by its own lock.
pub struct RingCache<K: CacheKey, V> {
    inner: Shards<K, V>,
}

impl<K: CacheKey, V: Clone> RingCache<K, V> {
    pub fn new(capacity: usize, shards: usize, loader: Loader<K, V>) -> Self {
        RingCache {
            inner: Shards::new(capacity, shards, loader),
        }
    }

    /// Index of the shard responsible for `key`.
    pub fn shard_of(&self, key: &K) -> usize {
        self.inner.owner(key)
    }

    fn lookup(&self, key: &K) -> V {
        let owner = self.inner.owner(key);
        self.inner.shards[owner].get(key, &self.inner.loader, &self.inner.stats)
    }
}

delegate_loading_cache!(RingCache);

/// A ring cache that avoids waiting on a busy owner shard.
///
/// A lookup first tries the owner without blocking, then every other shard in
/// ring order, and uses the first one it can lock. Only when all shards are
/// busy does it block on the owner. The value is loaded into whichever shard
/// was taken, so a key can be cached in a shard that does not own it and
/// later lookups may miss even though the value is resident elsewhere.
pub struct PriorityRingCache<K: CacheKey, V> {
    inner: Shards<K, V>,
}

impl<K: CacheKey, V: Clone> PriorityRingCache<K, V> {
    pub fn new(capacity: usize, shards: usize, loader: Loader<K, V>) -> Self {
        PriorityRingCache {
            inner: Shards::new(capacity, shards, loader),
        }
    }

    fn lookup(&self, key: &K) -> V {
        let owner = self.inner.owner(key);
        let count = self.inner.count();

        for step in 0..count {
            let slot = (owner + step) % count;
            if let Some(value) =
                self.inner.shards[slot].try_get(key, &self.inner.loader, &self.inner.stats)
            {
                return value;
            }
        }

        self.inner.shards[owner].get(key, &self.inner.loader, &self.inner.stats)
    }
}

delegate_loading_cache!(PriorityRingCache);
