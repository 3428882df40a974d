//! Hierarchical vocabulary tree.
//!
//! The tree recursively clusters descriptor space with `split`-way k-means
//! down to `depth` levels. Every node is a visual word: an image is described
//! by how many of its descriptors pass through each node, weighted by the
//! node's inverse document frequency and L2-normalized. Leaves keep postings
//! of the images whose descriptors ended there, so a query only scores images
//! that share at least one leaf with it.

mod build;
mod io;
pub mod node;
mod query;

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::clustering::{KMeans, LloydKMeans};
use crate::dataset::{Dataset, Image};
use crate::error::{Result, VocabTreeError};
use crate::search::{MatchResults, ScoreKind, SearchIndex};
use crate::storage::Storage;

pub use node::TreeNode;

/// Shape of a vocabulary tree and its training sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// Children per inner node.
    pub split: u32,
    /// Number of levels, root included.
    pub depth: u32,
    /// Cluster at most this many descriptors, sampled uniformly at random.
    pub max_training_descriptors: Option<usize>,
    /// Seed for descriptor sampling.
    pub seed: Option<u64>,
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            split: 8,
            depth: 3,
            max_training_descriptors: None,
            seed: None,
        }
    }
}

impl TreeParams {
    pub fn new(split: u32, depth: u32) -> Self {
        TreeParams {
            split,
            depth,
            ..TreeParams::default()
        }
    }

    /// Check the shape and return the node count.
    pub fn validate(&self) -> Result<u32> {
        if self.split < 2 {
            return Err(VocabTreeError::invalid_config(format!(
                "split must be at least 2, got {}",
                self.split
            )));
        }
        if self.depth < 1 {
            return Err(VocabTreeError::invalid_config("depth must be at least 1"));
        }
        node::node_count(self.split, self.depth).ok_or_else(|| {
            VocabTreeError::invalid_config(format!(
                "a tree with split {} and depth {} has too many nodes",
                self.split, self.depth
            ))
        })
    }

    /// Conventional file name for a tree of this shape.
    pub fn file_name(&self) -> String {
        format!("tree.{}.{}.bin", self.split, self.depth)
    }
}

/// A trained (or empty) vocabulary tree.
#[derive(Debug, Clone)]
pub struct VocabTree {
    params: TreeParams,
    nodes: Vec<TreeNode>,
    weights: Vec<f32>,
    /// Leaf postings indexed by the leaf's level index: image id -> term frequency.
    postings: Vec<AHashMap<u64, u32>>,
    /// Weighted, normalized document vectors by image id.
    vectors: AHashMap<u64, Arc<Vec<f32>>>,
    kmeans: Arc<dyn KMeans>,
}

impl Default for VocabTree {
    fn default() -> Self {
        VocabTree::with_kmeans(TreeParams::default(), Arc::new(LloydKMeans::default()))
    }
}

impl VocabTree {
    /// An empty tree of the given shape using the default k-means.
    pub fn new(params: TreeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self::with_kmeans(params, Arc::new(LloydKMeans::default())))
    }

    /// An empty tree that clusters with `kmeans`. Parameters are validated
    /// when the structure is built.
    pub fn with_kmeans(params: TreeParams, kmeans: Arc<dyn KMeans>) -> Self {
        VocabTree {
            params,
            nodes: Vec::new(),
            weights: Vec::new(),
            postings: Vec::new(),
            vectors: AHashMap::new(),
            kmeans,
        }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn split(&self) -> u32 {
        self.params.split
    }

    pub fn depth(&self) -> u32 {
        self.params.depth
    }

    /// Node count of the built structure, 0 before building.
    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Per-node idf weights; empty until images are indexed.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Number of leaf posting lists.
    pub fn num_leaves(&self) -> usize {
        self.postings.len()
    }

    /// Postings of the leaf at `leaf_level_index`: image id -> term frequency.
    pub fn leaf_postings(&self, leaf_level_index: usize) -> Option<&AHashMap<u64, u32>> {
        self.postings.get(leaf_level_index)
    }

    /// Document vector of an indexed image.
    pub fn document_vector(&self, image_id: u64) -> Option<&[f32]> {
        self.vectors.get(&image_id).map(|v| v.as_slice())
    }

    /// Number of indexed images.
    pub fn num_images(&self) -> usize {
        self.vectors.len()
    }

    /// Ids of indexed images in ascending order.
    pub fn image_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.vectors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the tree has a structure and weights to search with.
    pub fn is_trained(&self) -> bool {
        !self.nodes.is_empty() && self.weights.len() == self.nodes.len()
    }

    /// Reset to an empty tree, keeping parameters and k-means.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.weights.clear();
        self.postings.clear();
        self.vectors.clear();
    }

    /// Check the arena invariants of a built structure.
    pub fn validate_structure(&self) -> Result<()> {
        let split = self.params.split;
        let expected = self.params.validate()? as usize;
        if self.nodes.len() != expected {
            return Err(VocabTreeError::corrupted(format!(
                "expected {expected} nodes, found {}",
                self.nodes.len()
            )));
        }

        for (position, node) in self.nodes.iter().enumerate() {
            if node.index as usize != position {
                return Err(VocabTreeError::corrupted(format!(
                    "node at position {position} claims index {}",
                    node.index
                )));
            }
            let is_leaf_level = node.level + 1 == self.params.depth;
            if node.is_leaf() != is_leaf_level {
                return Err(VocabTreeError::corrupted(format!(
                    "node {position} at level {} has first child {}",
                    node.level, node.first_child_index
                )));
            }
            for (offset, child) in node.children(split).enumerate() {
                let (index, level_index) =
                    node::child_position(split, node.level, node.level_index, offset as u32);
                let child_node = self.nodes.get(child as usize);
                let consistent = child == index
                    && child_node.is_some_and(|c| {
                        c.level == node.level + 1 && c.level_index == level_index
                    });
                if !consistent {
                    return Err(VocabTreeError::corrupted(format!(
                        "child {offset} of node {position} is misplaced"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SearchIndex for VocabTree {
    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Distance
    }

    fn is_trained(&self) -> bool {
        VocabTree::is_trained(self)
    }

    fn search_image(&self, dataset: &dyn Dataset, image: &Image, limit: usize) -> MatchResults {
        self.search(dataset, image, limit)
    }

    fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        VocabTree::save(self, storage, name)
    }

    fn load(&mut self, storage: &dyn Storage, name: &str) -> Result<()> {
        VocabTree::load(self, storage, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert_eq!(TreeParams::new(2, 2).validate().unwrap(), 3);
        assert!(TreeParams::new(1, 2).validate().is_err());
        assert!(TreeParams::new(4, 0).validate().is_err());
        assert!(TreeParams::new(1000, 5).validate().is_err());
        assert!(VocabTree::new(TreeParams::new(0, 3)).is_err());
        assert_eq!(TreeParams::new(10, 6).file_name(), "tree.10.6.bin");
    }

    #[test]
    fn test_empty_tree() {
        let tree = VocabTree::default();
        assert!(!tree.is_trained());
        assert_eq!(tree.number_of_nodes(), 0);
        assert_eq!(tree.split(), 8);
        assert_eq!(tree.depth(), 3);
        assert!(tree.document_vector(0).is_none());
    }

    #[test]
    fn test_params_json_defaults() {
        let params: TreeParams = serde_json::from_str(r#"{"split": 4}"#).unwrap();
        assert_eq!(params.split, 4);
        assert_eq!(params.depth, 3);
    }
}
