//! Bounded, memoizing key/value caches for per-image feature data.
//!
//! Every cache wraps a loader `K -> V` and keeps recently used values in one
//! or more LRU shards. The strategies differ only in how a key picks its
//! shard and how shards are locked:
//!
//! - [`SingleCache`]: one shard behind one lock.
//! - [`PerThreadCache`]: one shard per rayon worker; a key may be cached once
//!   per worker.
//! - [`RingCache`]: shards own contiguous key ranges arranged in a ring.
//! - [`PriorityRingCache`]: like the ring, but a busy owner shard is bypassed
//!   in favour of the next free shard, so a key may be cached outside its
//!   owner.
//!
//! A capacity of zero disables caching; every `get` then calls the loader.

pub mod sharded;
pub mod single;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use sharded::{PerThreadCache, PriorityRingCache, RingCache};
pub use single::SingleCache;

/// Loader invoked on a cache miss.
pub type Loader<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Keys usable with every strategy. `ordinal` places a key on the ring.
pub trait CacheKey: Hash + Eq + Clone + Send + Sync + Debug + 'static {
    /// Numeric position of the key, used for key-range sharding.
    fn ordinal(&self) -> u64;
}

impl CacheKey for u64 {
    fn ordinal(&self) -> u64 {
        *self
    }
}

impl CacheKey for u32 {
    fn ordinal(&self) -> u64 {
        u64::from(*self)
    }
}

impl CacheKey for usize {
    fn ordinal(&self) -> u64 {
        *self as u64
    }
}

/// A capacity-bounded memoizing cache.
pub trait LoadingCache<K: CacheKey, V: Clone + Send + Sync>: Send + Sync + Debug {
    /// Return the cached value for `key`, loading and inserting it on a miss.
    fn get(&self, key: &K) -> V;

    /// Look up several keys, in order.
    fn get_many(&self, keys: &[K]) -> Vec<V> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Total capacity across all shards.
    fn capacity(&self) -> usize;

    /// Number of cached entries across all shards.
    fn len(&self) -> usize;

    /// Whether nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counters.
    fn stats(&self) -> CacheStatsSnapshot;

    /// Forget `key` in every shard, so the next `get` reloads it.
    fn invalidate(&self, key: &K);

    /// Drop every cached entry. Counters are kept.
    fn clear(&self);
}

/// Lock-free hit/miss counters shared by all shards of a cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served from the cache, 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Sharding and locking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Single,
    PerThread,
    Ring,
    #[default]
    PriorityRing,
}

impl CacheStrategy {
    /// Build a cache of this strategy. `shards` is ignored by [`CacheStrategy::Single`].
    pub fn build<K, V>(
        self,
        capacity: usize,
        shards: usize,
        loader: Loader<K, V>,
    ) -> Box<dyn LoadingCache<K, V>>
    where
        K: CacheKey,
        V: Clone + Send + Sync + 'static,
    {
        match self {
            CacheStrategy::Single => Box::new(SingleCache::new(capacity, loader)),
            CacheStrategy::PerThread => Box::new(PerThreadCache::new(capacity, shards, loader)),
            CacheStrategy::Ring => Box::new(RingCache::new(capacity, shards, loader)),
            CacheStrategy::PriorityRing => {
                Box::new(PriorityRingCache::new(capacity, shards, loader))
            }
        }
    }
}

impl std::str::FromStr for CacheStrategy {
    type Err = crate::error::VocabTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(CacheStrategy::Single),
            "per_thread" | "per-thread" => Ok(CacheStrategy::PerThread),
            "ring" => Ok(CacheStrategy::Ring),
            "priority_ring" | "priority-ring" => Ok(CacheStrategy::PriorityRing),
            other => Err(crate::error::VocabTreeError::invalid_config(format!(
                "unknown cache strategy: {other}"
            ))),
        }
    }
}

/// Cache settings carried in the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: CacheStrategy,
    /// Total entries across all shards; 0 disables caching.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            strategy: CacheStrategy::PriorityRing,
            capacity: 256,
        }
    }
}

/// Per-shard capacity for `capacity` split over `shards`.
pub(crate) fn shard_capacity(capacity: usize, shards: usize) -> usize {
    if capacity == 0 {
        0
    } else {
        (capacity / shards.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shard_capacity() {
        assert_eq!(shard_capacity(0, 4), 0);
        assert_eq!(shard_capacity(3, 4), 1);
        assert_eq!(shard_capacity(100, 4), 25);
        assert_eq!(shard_capacity(10, 0), 10);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("ring".parse::<CacheStrategy>().unwrap(), CacheStrategy::Ring);
        assert_eq!(
            "priority-ring".parse::<CacheStrategy>().unwrap(),
            CacheStrategy::PriorityRing
        );
        assert!("lfu".parse::<CacheStrategy>().is_err());

        let json = serde_json::to_string(&CacheStrategy::PerThread).unwrap();
        assert_eq!(json, "\"per_thread\"");
    }

    #[test]
    fn test_every_strategy_memoizes() {
        for strategy in [
            CacheStrategy::Single,
            CacheStrategy::PerThread,
            CacheStrategy::Ring,
            CacheStrategy::PriorityRing,
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            let cache = strategy.build::<u64, u64>(
                64,
                4,
                Arc::new(move |k: &u64| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    k * 2
                }),
            );

            assert_eq!(cache.get(&21), 42);
            assert_eq!(cache.get(&21), 42);
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{strategy:?}");
            assert_eq!(cache.get_many(&[1, 2]), vec![2, 4]);

            let stats = cache.stats();
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.misses, 3);
            assert_eq!(cache.len(), 3);

            cache.clear();
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_hit_rate() {
        let snapshot = CacheStatsSnapshot { hits: 3, misses: 1 };
        assert_eq!(snapshot.hit_rate(), 0.75);
        assert_eq!(CacheStatsSnapshot::default().hit_rate(), 0.0);
    }
}
