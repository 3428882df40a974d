//! Pluggable k-means clustering.
//!
//! Tree construction and codebook training only depend on the [`KMeans`]
//! trait; [`LloydKMeans`] is the bundled implementation (k-means++ seeding
//! followed by Lloyd iterations).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::DescriptorMatrix;
use crate::error::{Result, VocabTreeError};
use crate::util::simd::squared_euclidean;

/// Output of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster label of every input row, in `[0, k)`.
    pub labels: Vec<usize>,
    /// `k` centroids, each of the input dimension.
    pub centroids: Vec<Vec<f32>>,
}

impl Clustering {
    /// Row indices grouped by label. Fails on a label with no centroid.
    pub fn partitions(&self) -> Result<Vec<Vec<usize>>> {
        let mut groups = vec![Vec::new(); self.centroids.len()];
        for (row, &label) in self.labels.iter().enumerate() {
            let group = groups.get_mut(label).ok_or_else(|| {
                VocabTreeError::clustering(format!(
                    "row {row} has label {label} but only {} centroids exist",
                    self.centroids.len()
                ))
            })?;
            group.push(row);
        }
        Ok(groups)
    }
}

/// A k-means routine: `cluster(samples, k) -> (labels, centroids)`.
///
/// Implementations may run in parallel internally; callers only require
/// `samples.rows() >= k`.
pub trait KMeans: Send + Sync + std::fmt::Debug {
    /// Cluster the rows of `samples` into `k` groups.
    fn cluster(&self, samples: &DescriptorMatrix, k: usize) -> Result<Clustering>;
}

/// Parameters for [`LloydKMeans`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    /// Maximum number of Lloyd iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves more than this (squared distance).
    pub epsilon: f32,
    /// RNG seed for k-means++ seeding; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
    /// Minimum number of samples before assignment runs on the rayon pool.
    pub parallel_threshold: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        KMeansParams {
            max_iterations: 18,
            epsilon: 1e-6,
            seed: None,
            parallel_threshold: 1024,
        }
    }
}

/// k-means++ seeded Lloyd's algorithm.
#[derive(Debug, Clone, Default)]
pub struct LloydKMeans {
    params: KMeansParams,
}

impl LloydKMeans {
    /// Create a clusterer with the given parameters.
    pub fn new(params: KMeansParams) -> Self {
        LloydKMeans { params }
    }

    /// Create a deterministic clusterer.
    pub fn with_seed(seed: u64) -> Self {
        LloydKMeans {
            params: KMeansParams {
                seed: Some(seed),
                ..KMeansParams::default()
            },
        }
    }

    /// Parameters in use.
    pub fn params(&self) -> &KMeansParams {
        &self.params
    }

    fn rng(&self) -> StdRng {
        match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(rand::rng().random()),
        }
    }

    fn init_plus_plus(&self, samples: &DescriptorMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
        let n = samples.rows();
        let mut centroids = Vec::with_capacity(k);
        centroids.push(samples.row(rng.random_range(0..n)).to_vec());

        let mut min_dist: Vec<f32> = samples
            .iter_rows()
            .map(|row| squared_euclidean(row, &centroids[0]))
            .collect();

        while centroids.len() < k {
            let total: f32 = min_dist.iter().sum();
            let next = if total <= 0.0 {
                rng.random_range(0..n)
            } else {
                let target = rng.random::<f32>() * total;
                let mut cumsum = 0.0;
                min_dist
                    .iter()
                    .position(|&d| {
                        cumsum += d;
                        cumsum >= target
                    })
                    .unwrap_or(n - 1)
            };

            let centroid = samples.row(next).to_vec();
            for (row, dist) in samples.iter_rows().zip(min_dist.iter_mut()) {
                *dist = dist.min(squared_euclidean(row, &centroid));
            }
            centroids.push(centroid);
        }

        centroids
    }

    fn assign(&self, samples: &DescriptorMatrix, centroids: &[Vec<f32>]) -> Vec<usize> {
        if samples.rows() >= self.params.parallel_threshold {
            samples
                .as_slice()
                .par_chunks_exact(samples.dimension())
                .map(|row| nearest(row, centroids))
                .collect()
        } else {
            samples.iter_rows().map(|row| nearest(row, centroids)).collect()
        }
    }

    /// Recompute centroids; returns the largest squared movement.
    fn update(&self, samples: &DescriptorMatrix, labels: &[usize], centroids: &mut [Vec<f32>]) -> f32 {
        let dim = samples.dimension();
        let mut sums = vec![vec![0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];

        for (row, &label) in samples.iter_rows().zip(labels) {
            counts[label] += 1;
            for (acc, v) in sums[label].iter_mut().zip(row) {
                *acc += v;
            }
        }

        let mut max_shift = 0f32;
        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
            // empty clusters keep their previous centroid
            if count == 0 {
                continue;
            }
            let updated: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
            max_shift = max_shift.max(squared_euclidean(centroid, &updated));
            *centroid = updated;
        }
        max_shift
    }
}

impl KMeans for LloydKMeans {
    fn cluster(&self, samples: &DescriptorMatrix, k: usize) -> Result<Clustering> {
        if k == 0 {
            return Err(VocabTreeError::clustering("k must be positive"));
        }
        if samples.rows() < k {
            return Err(VocabTreeError::clustering(format!(
                "cannot form {k} clusters from {} samples",
                samples.rows()
            )));
        }

        let mut rng = self.rng();
        let mut centroids = self.init_plus_plus(samples, k, &mut rng);
        let mut labels = self.assign(samples, &centroids);

        for iteration in 0..self.params.max_iterations {
            let shift = self.update(samples, &labels, &mut centroids);
            labels = self.assign(samples, &centroids);
            if shift <= self.params.epsilon {
                log::trace!("k-means converged after {} iterations", iteration + 1);
                break;
            }
        }

        Ok(Clustering { labels, centroids })
    }
}

/// Index of the centroid closest to `row`; ties go to the lowest index.
pub fn nearest(row: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean(row, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}
