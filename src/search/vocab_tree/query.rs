//! Routing descriptors and ranking candidates.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;

use super::VocabTree;
use super::build::weighted_vector;
use super::node::TreeNode;
use crate::dataset::{Dataset, DescriptorMatrix, Image};
use crate::search::{MatchResults, ScoreKind, SearchHit};
use crate::util::simd::{dot_product, squared_euclidean};

/// Weighted path vector of a query and the leaves its descriptors reached.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVector {
    pub vector: Vec<f32>,
    /// Level indices of the reached leaves, ascending.
    pub leaves: BTreeSet<u32>,
}

impl VocabTree {
    /// Walk `descriptor` from the root to a leaf, calling `visit` on every
    /// node on the path. Returns the leaf's level index.
    pub(super) fn route<F: FnMut(&TreeNode)>(&self, descriptor: &[f32], mut visit: F) -> u32 {
        let mut current = &self.nodes[0];
        visit(current);
        while !current.is_leaf() {
            current = &self.nodes[self.best_child(current, descriptor) as usize];
            visit(current);
        }
        current.level_index
    }

    /// Child with the largest dot product against `descriptor`. Children
    /// without a mean are skipped, ties keep the earlier child, and the first
    /// child is taken when none has a mean.
    fn best_child(&self, parent: &TreeNode, descriptor: &[f32]) -> u32 {
        let mut best: Option<(u32, f32)> = None;
        for child in parent.children(self.params.split) {
            let node = &self.nodes[child as usize];
            if !node.has_mean() {
                continue;
            }
            let score = dot_product(descriptor, &node.mean);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((child, score));
            }
        }
        best.map_or(parent.first_child_index, |(child, _)| child)
    }

    /// Route every query descriptor and build the weighted, normalized path
    /// vector. `None` if the tree is untrained or the descriptors are empty
    /// or of the wrong dimension.
    pub fn query_vector(&self, descriptors: &DescriptorMatrix) -> Option<QueryVector> {
        if !self.is_trained() || descriptors.is_empty() {
            return None;
        }
        if self.dimension().is_some_and(|d| d != descriptors.dimension()) {
            log::warn!(
                "Query descriptor dimension {} does not match the tree",
                descriptors.dimension()
            );
            return None;
        }

        let mut visits: AHashMap<u32, u32> = AHashMap::new();
        let mut leaves = BTreeSet::new();
        for descriptor in descriptors.iter_rows() {
            let leaf = self.route(descriptor, |node| {
                *visits.entry(node.index).or_insert(0) += 1;
            });
            leaves.insert(leaf);
        }

        let mut visits: Vec<(u32, u32)> = visits.into_iter().collect();
        visits.sort_unstable();
        Some(QueryVector {
            vector: weighted_vector(self.nodes.len(), &visits, &self.weights),
            leaves,
        })
    }

    /// Rank indexed images against `descriptors` using the in-memory
    /// document vectors.
    pub fn query(&self, descriptors: &DescriptorMatrix, top_k: usize) -> MatchResults {
        self.rank(descriptors, top_k, |id| self.vectors.get(&id).cloned())
    }

    /// Rank indexed images against the descriptors of `image`. Candidate
    /// vectors come from the dataset's vector store when it has a usable one.
    pub fn search(&self, dataset: &dyn Dataset, image: &Image, top_k: usize) -> MatchResults {
        if !self.is_trained() {
            return MatchResults::empty(ScoreKind::Distance);
        }
        let Some(descriptors) = dataset.load_descriptors(image) else {
            log::debug!("No descriptors for query image {}", image.id);
            return MatchResults::empty(ScoreKind::Distance);
        };

        let total = self.nodes.len();
        self.rank(&descriptors, top_k, |id| {
            dataset
                .load_vec_feature(id)
                .filter(|vector| vector.len() == total)
                .or_else(|| self.vectors.get(&id).cloned())
        })
    }

    fn rank<F>(&self, descriptors: &DescriptorMatrix, top_k: usize, vector_of: F) -> MatchResults
    where
        F: Fn(u64) -> Option<Arc<Vec<f32>>> + Sync,
    {
        let Some(query) = self.query_vector(descriptors) else {
            return MatchResults::empty(ScoreKind::Distance);
        };

        let candidates: BTreeSet<u64> = query
            .leaves
            .iter()
            .filter_map(|&leaf| self.postings.get(leaf as usize))
            .flat_map(|postings| postings.keys().copied())
            .collect();

        let hits: Vec<SearchHit> = candidates
            .into_par_iter()
            .filter_map(|image_id| {
                let vector = vector_of(image_id)?;
                Some(SearchHit {
                    image_id,
                    score: squared_euclidean(&query.vector, &vector),
                })
            })
            .collect();

        log::trace!(
            "Query reached {} leaves and scored {} candidates",
            query.leaves.len(),
            hits.len()
        );
        MatchResults::ranked(ScoreKind::Distance, hits, top_k)
    }
}
