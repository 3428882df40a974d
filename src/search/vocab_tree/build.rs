//! Tree construction and image indexing.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;
use rayon::prelude::*;

use super::VocabTree;
use super::node::{self, TreeNode};
use crate::dataset::{self, Dataset, DescriptorMatrix, Image};
use crate::error::{Result, VocabTreeError};
use crate::util::simd::normalize_in_place;

/// Sparse per-node visit counts of one image, ascending by node index.
pub(super) type Visits = Vec<(u32, u32)>;

/// A child partition: the training rows that fell into it and its mean.
type Partition = (Vec<usize>, Vec<f32>);

impl VocabTree {
    /// Cluster `descriptors` into the node hierarchy. Any previous structure
    /// and indexed images are discarded.
    pub fn build_structure(&mut self, descriptors: &DescriptorMatrix) -> Result<()> {
        let total = self.params.validate()? as usize;
        if descriptors.is_empty() {
            return Err(VocabTreeError::index("cannot build a tree without training descriptors"));
        }
        self.clear();

        log::info!(
            "Building vocabulary tree (split {}, depth {}, {} nodes) from {} descriptors",
            self.params.split,
            self.params.depth,
            total,
            descriptors.rows()
        );

        let rows: Vec<usize> = (0..descriptors.rows()).collect();
        let built = self.build_subtree(descriptors, &rows, 0, 0, Vec::new())?;

        let mut nodes = vec![TreeNode::default(); total];
        for node in built {
            let index = node.index as usize;
            nodes[index] = node;
        }
        self.nodes = nodes;
        self.validate_structure()
    }

    fn build_subtree(
        &self,
        descriptors: &DescriptorMatrix,
        rows: &[usize],
        level: u32,
        level_index: u32,
        mean: Vec<f32>,
    ) -> Result<Vec<TreeNode>> {
        let split = self.params.split;
        let base = node::level_offset(split, level).unwrap_or(0) as u32;
        let is_leaf = level + 1 >= self.params.depth;
        let first_child_index = if is_leaf {
            0
        } else {
            node::child_position(split, level, level_index, 0).0
        };

        let current = TreeNode {
            index: base + level_index,
            level,
            level_index,
            first_child_index,
            inverted_file_length: rows.len() as u32,
            mean,
        };
        if is_leaf {
            return Ok(vec![current]);
        }

        let partitions = self.partition(descriptors, rows)?;
        let children = partitions
            .into_par_iter()
            .enumerate()
            .map(|(offset, (child_rows, child_mean))| {
                let (_, child_level_index) =
                    node::child_position(split, level, level_index, offset as u32);
                self.build_subtree(descriptors, &child_rows, level + 1, child_level_index, child_mean)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut subtree = Vec::with_capacity(1 + children.iter().map(Vec::len).sum::<usize>());
        subtree.push(current);
        children.into_iter().for_each(|child| subtree.extend(child));
        Ok(subtree)
    }

    /// Split `rows` into `split` partitions with unit-length means.
    fn partition(&self, descriptors: &DescriptorMatrix, rows: &[usize]) -> Result<Vec<Partition>> {
        let split = self.params.split as usize;

        if rows.len() < split {
            let mut partitions: Vec<Partition> = rows
                .iter()
                .map(|&row| {
                    let mut mean = descriptors.row(row).to_vec();
                    normalize_in_place(&mut mean);
                    (vec![row], mean)
                })
                .collect();
            partitions.resize_with(split, Default::default);
            return Ok(partitions);
        }

        let samples = descriptors.select_rows(rows);
        let clustering = self.kmeans.cluster(&samples, split)?;
        if clustering.centroids.len() != split {
            return Err(VocabTreeError::clustering(format!(
                "k-means returned {} centroids for k = {split}",
                clustering.centroids.len()
            )));
        }

        if clustering.labels.len() != rows.len() {
            return Err(VocabTreeError::clustering(format!(
                "k-means labelled {} of {} rows",
                clustering.labels.len(),
                rows.len()
            )));
        }

        let groups = clustering.partitions()?;
        Ok(groups
            .into_iter()
            .zip(clustering.centroids)
            .map(|(members, mut centroid)| {
                normalize_in_place(&mut centroid);
                (members.into_iter().map(|i| rows[i]).collect(), centroid)
            })
            .collect())
    }

    /// Route every image's descriptors through the built structure, filling
    /// the leaf postings, the node weights and the document vectors. Any
    /// previously indexed images are replaced. Returns the number of images
    /// indexed; images without usable descriptors are skipped but still
    /// count toward N in `ln(N / count)`.
    pub fn index_images(&mut self, images: &[(u64, DescriptorMatrix)]) -> Result<usize> {
        self.index_with(images.len(), |i| {
            let (id, descriptors) = &images[i];
            Some((*id, Cow::Borrowed(descriptors)))
        })
    }

    pub(super) fn index_with<'a, F>(&mut self, count: usize, load: F) -> Result<usize>
    where
        F: Fn(usize) -> Option<(u64, Cow<'a, DescriptorMatrix>)> + Sync,
    {
        if self.nodes.is_empty() {
            return Err(VocabTreeError::index("tree structure has not been built"));
        }
        let total = self.nodes.len();
        let leaves = node::leaf_count(self.params.split, self.params.depth)
            .ok_or_else(|| VocabTreeError::invalid_config("leaf count overflows u32"))?
            as usize;
        let dimension = self.dimension();

        let counts: Vec<AtomicU32> = (0..total).map(|_| AtomicU32::new(0)).collect();
        let postings: Vec<Mutex<AHashMap<u64, u32>>> =
            (0..leaves).map(|_| Mutex::new(AHashMap::new())).collect();

        let this = &*self;
        let indexed: Vec<(u64, Visits)> = (0..count)
            .into_par_iter()
            .filter_map(|i| {
                let (id, descriptors) = load(i)?;
                if descriptors.is_empty() {
                    log::warn!("Skipping image {id}: no descriptors");
                    return None;
                }
                if dimension.is_some_and(|d| d != descriptors.dimension()) {
                    log::warn!(
                        "Skipping image {id}: descriptor dimension {} does not match the tree",
                        descriptors.dimension()
                    );
                    return None;
                }

                let mut visits: AHashMap<u32, u32> = AHashMap::new();
                let mut frequencies: AHashMap<u32, u32> = AHashMap::new();
                for descriptor in descriptors.iter_rows() {
                    let leaf = this.route(descriptor, |node| {
                        *visits.entry(node.index).or_insert(0) += 1;
                    });
                    *frequencies.entry(leaf).or_insert(0) += 1;
                }

                for &node in visits.keys() {
                    counts[node as usize].fetch_add(1, Ordering::Relaxed);
                }
                for (leaf, frequency) in frequencies {
                    *postings[leaf as usize].lock().entry(id).or_insert(0) += frequency;
                }

                let mut visits: Visits = visits.into_iter().collect();
                visits.sort_unstable();
                Some((id, visits))
            })
            .collect();

        let indexed_images = indexed.len();
        let weights: Vec<f32> = counts
            .into_iter()
            .map(|visited| idf(count, visited.into_inner()))
            .collect();

        let vectors: Vec<(u64, Arc<Vec<f32>>)> = indexed
            .into_par_iter()
            .map(|(id, visits)| (id, Arc::new(weighted_vector(total, &visits, &weights))))
            .collect();

        self.postings = postings.into_iter().map(Mutex::into_inner).collect();
        self.weights = weights;
        self.vectors = vectors.into_iter().collect();

        log::info!(
            "Indexed {} of {} images into {} leaves",
            indexed_images,
            count,
            leaves
        );
        Ok(indexed_images)
    }

    /// Build the structure from (a sample of) the images' descriptors, index
    /// every image and hand each document vector to the dataset.
    pub fn train(&mut self, dataset: &dyn Dataset, images: &[Image]) -> Result<usize> {
        self.params.validate()?;

        let training = dataset::sample_descriptors(
            dataset,
            images,
            self.params.max_training_descriptors,
            self.params.seed,
        )?;
        self.build_structure(&training)?;
        drop(training);

        let indexed = self.index_with(images.len(), |i| {
            let image = &images[i];
            dataset
                .load_descriptors(image)
                .map(|descriptors| (image.id, Cow::Owned(descriptors)))
        })?;

        self.vectors
            .par_iter()
            .try_for_each(|(&id, vector)| dataset.store_vec_feature(id, vector))?;

        Ok(indexed)
    }

    /// Descriptor dimension of the built tree.
    pub fn dimension(&self) -> Option<usize> {
        self.nodes.iter().find(|node| node.has_mean()).map(|node| node.mean.len())
    }
}

/// `ln(n / count)`, or 0 for a node nobody visited.
pub(super) fn idf(n: usize, count: u32) -> f32 {
    if count == 0 || n == 0 {
        0.0
    } else {
        (n as f64 / f64::from(count)).ln() as f32
    }
}

/// Dense `visits * weight` vector scaled to unit length.
pub(super) fn weighted_vector(total: usize, visits: &[(u32, u32)], weights: &[f32]) -> Vec<f32> {
    let mut vector = vec![0f32; total];
    for &(node, count) in visits {
        let node = node as usize;
        vector[node] = count as f32 * weights[node];
    }
    normalize_in_place(&mut vector);
    vector
}
