//! Criterion benchmarks for vocabtree.
//!
//! Covers the hot paths of both engines and the feature caches:
//! - Vocabulary tree construction, indexing and querying
//! - Inverted index shortlisting and min-histogram scoring
//! - Cache lookups per sharding strategy

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use vocabtree::cache::{CacheStrategy, Loader};
use vocabtree::clustering::LloydKMeans;
use vocabtree::dataset::DescriptorMatrix;
use vocabtree::numerics::{SparseVector, canonicalize, min_hist};
use vocabtree::search::inverted_index::InvertedIndex;
use vocabtree::search::vocab_tree::{TreeParams, VocabTree};

const DIMENSION: usize = 32;

/// Random unit-ish descriptors, `rows` per image.
fn generate_images(count: usize, rows: usize, seed: u64) -> Vec<(u64, DescriptorMatrix)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            let data: Vec<f32> = (0..rows * DIMENSION)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect();
            (id as u64, DescriptorMatrix::from_flat(DIMENSION, data).unwrap())
        })
        .collect()
}

fn generate_bow(count: usize, words: u32, seed: u64) -> Vec<(u64, SparseVector)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| {
            let mut vector: SparseVector = (0..40)
                .map(|_| (rng.random_range(0..words), 1.0))
                .collect();
            canonicalize(&mut vector);
            (id as u64, vector)
        })
        .collect()
}

fn trained_tree(images: &[(u64, DescriptorMatrix)], split: u32, depth: u32) -> VocabTree {
    let mut tree = VocabTree::with_kmeans(
        TreeParams::new(split, depth),
        Arc::new(LloydKMeans::with_seed(7)),
    );
    let parts: Vec<DescriptorMatrix> = images.iter().map(|(_, d)| d.clone()).collect();
    tree.build_structure(&DescriptorMatrix::concat(&parts).unwrap())
        .unwrap();
    tree.index_images(images).unwrap();
    tree
}

/// Benchmark tree construction and querying.
fn bench_vocab_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("vocab_tree");
    group.sample_size(10);

    let images = generate_images(200, 50, 1);
    let parts: Vec<DescriptorMatrix> = images.iter().map(|(_, d)| d.clone()).collect();
    let training = DescriptorMatrix::concat(&parts).unwrap();

    for (split, depth) in [(4, 3), (8, 3)] {
        group.throughput(Throughput::Elements(training.rows() as u64));
        group.bench_with_input(
            BenchmarkId::new("build_structure", format!("{split}x{depth}")),
            &(split, depth),
            |b, &(split, depth)| {
                b.iter(|| {
                    let mut tree = VocabTree::with_kmeans(
                        TreeParams::new(split, depth),
                        Arc::new(LloydKMeans::with_seed(7)),
                    );
                    tree.build_structure(black_box(&training)).unwrap();
                    black_box(tree);
                })
            },
        );
    }

    let tree = trained_tree(&images, 8, 3);
    group.throughput(Throughput::Elements(images.len() as u64));
    group.bench_function("index_images", |b| {
        b.iter_with_setup(
            || tree.clone(),
            |mut tree| {
                tree.index_images(black_box(&images)).unwrap();
                black_box(tree);
            },
        )
    });

    let queries = generate_images(20, 50, 2);
    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("query_top10", |b| {
        b.iter(|| {
            for (_, descriptors) in &queries {
                black_box(tree.query(black_box(descriptors), 10));
            }
        })
    });

    group.finish();
}

/// Benchmark inverted index search.
fn bench_inverted_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("inverted_index");

    let words = 1024;
    let vectors = generate_bow(5000, words, 3);
    let mut index = InvertedIndex::default();
    index.train_from_vectors(words as usize, vectors.clone()).unwrap();
    let table: Vec<Arc<SparseVector>> = vectors.iter().map(|(_, v)| Arc::new(v.clone())).collect();
    let vector_of = |id: u64| table.get(id as usize).cloned();

    for cutoff in [64, 512, 4096] {
        group.bench_with_input(BenchmarkId::new("search", cutoff), &cutoff, |b, &cutoff| {
            let mut index = index.clone();
            index.set_cutoff(cutoff);
            b.iter(|| black_box(index.search_with(black_box(&vectors[0].1), 10, vector_of)))
        });
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("min_hist_batch", |b| {
        let idf = index.idf_weights();
        let query = &vectors[0].1;
        b.iter(|| {
            let scores: Vec<f32> = vectors[1..1001]
                .par_iter()
                .map(|(_, v)| min_hist(query, v, idf))
                .collect();
            black_box(scores);
        })
    });

    group.finish();
}

/// Benchmark cache lookups under a rayon pool.
fn bench_caches(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let threads = rayon::current_num_threads();

    for strategy in [
        CacheStrategy::Single,
        CacheStrategy::PerThread,
        CacheStrategy::Ring,
        CacheStrategy::PriorityRing,
    ] {
        let loader: Loader<u64, Arc<Vec<f32>>> = Arc::new(|key: &u64| Arc::new(vec![*key as f32; 64]));
        let cache = strategy.build(512, threads, loader);

        group.throughput(Throughput::Elements(10_000));
        group.bench_function(BenchmarkId::new("parallel_get", format!("{strategy:?}")), |b| {
            b.iter(|| {
                (0..10_000u64).into_par_iter().for_each(|i| {
                    black_box(cache.get(&(i % 768)));
                });
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_vocab_tree, bench_inverted_index, bench_caches);

criterion_main!(benches);
