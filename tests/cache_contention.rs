use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use vocabtree::cache::{CacheStrategy, Loader, LoadingCache, SingleCache};

const ALL_STRATEGIES: [CacheStrategy; 4] = [
    CacheStrategy::Single,
    CacheStrategy::PerThread,
    CacheStrategy::Ring,
    CacheStrategy::PriorityRing,
];

fn counting_loader(calls: Arc<AtomicUsize>) -> Loader<u64, Arc<Vec<f32>>> {
    Arc::new(move |key: &u64| {
        calls.fetch_add(1, Ordering::SeqCst);
        Arc::new(vec![*key as f32; 4])
    })
}

fn pool(threads: usize) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .unwrap()
}

#[test]
fn repeated_gets_do_not_reload() {
    for strategy in ALL_STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = strategy.build(32, 4, counting_loader(calls.clone()));

        for _ in 0..3 {
            for key in 0..4u64 {
                assert_eq!(cache.get(&key)[0], key as f32);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4, "{strategy:?}");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (8, 4), "{strategy:?}");
    }
}

#[test]
fn one_key_past_capacity_evicts_the_least_recently_used() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = SingleCache::new(3, counting_loader(calls.clone()));

    cache.get(&0);
    cache.get(&1);
    cache.get(&2);
    cache.get(&0);
    cache.get(&3);
    assert_eq!(cache.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    for key in [0, 2, 3] {
        cache.get(&key);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    cache.get(&1);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn zero_capacity_always_loads() {
    for strategy in ALL_STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = strategy.build(0, 4, counting_loader(calls.clone()));
        for _ in 0..5 {
            cache.get(&9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5, "{strategy:?}");
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }
}

#[test]
fn invalidate_forces_a_reload() {
    for strategy in ALL_STRATEGIES {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = strategy.build(16, 2, counting_loader(calls.clone()));
        cache.get(&3);
        cache.invalidate(&3);
        cache.get(&3);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{strategy:?}");

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 2);
    }
}

#[test]
fn per_thread_cache_duplicates_a_key_per_worker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = CacheStrategy::PerThread.build(64, 4, counting_loader(calls.clone()));

    pool(4).broadcast(|_| {
        for _ in 0..10 {
            assert_eq!(cache.get(&42)[0], 42.0);
        }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.stats().hits, 36);
}

#[test]
fn ring_loads_each_key_once_under_contention() {
    let calls = Arc::new(AtomicUsize::new(0));
    // 64 keys over 4 shards of 16: every key fits in its owner shard.
    let cache = CacheStrategy::Ring.build(64, 4, counting_loader(calls.clone()));

    pool(8).install(|| {
        (0..20_000u64).into_par_iter().for_each(|i| {
            let key = i % 64;
            assert_eq!(cache.get(&key)[0], key as f32);
        });
    });

    assert_eq!(calls.load(Ordering::SeqCst), 64);
    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 20_000);
}

#[test]
fn priority_ring_keeps_a_useful_hit_rate_under_contention() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = CacheStrategy::PriorityRing.build(64, 4, counting_loader(calls.clone()));

    pool(8).install(|| {
        (0..20_000u64).into_par_iter().for_each(|i| {
            let key = i % 64;
            assert_eq!(cache.get(&key)[0], key as f32);
        });
    });

    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 20_000);
    assert_eq!(stats.misses as usize, calls.load(Ordering::SeqCst));
    // Misplaced entries cost extra loads, but every key is loaded at least once.
    assert!(stats.misses >= 64);
    assert!(
        stats.hit_rate() > 0.2,
        "hit rate {:.3} with {} misses",
        stats.hit_rate(),
        stats.misses
    );
    assert!(cache.len() <= cache.capacity());
}
