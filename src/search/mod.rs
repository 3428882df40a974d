//! Search engines and their ranked results.
//!
//! Two engines share the [`SearchIndex`] interface:
//!
//! - [`vocab_tree::VocabTree`] ranks by squared distance between weighted path
//!   vectors (lower is better).
//! - [`inverted_index::InvertedIndex`] ranks by weighted min-histogram
//!   similarity between bag-of-words vectors (higher is better).
//!
//! Raw scores keep their engine's meaning and carry a [`ScoreKind`];
//! [`MatchResults::relevances`] converts them to one higher-is-better scale.

pub mod inverted_index;
pub mod vocab_tree;

use std::cmp::Ordering;
use std::fmt::Debug;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Image};
use crate::error::Result;
use crate::storage::Storage;

/// How a raw score orders matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Lower is better.
    Distance,
    /// Higher is better.
    Similarity,
}

impl ScoreKind {
    /// Ordering of two scores from best to worst.
    pub fn compare(self, a: f32, b: f32) -> Ordering {
        match self {
            ScoreKind::Distance => a.total_cmp(&b),
            ScoreKind::Similarity => b.total_cmp(&a),
        }
    }

    /// Map a raw score onto a higher-is-better scale.
    pub fn relevance(self, score: f32) -> f32 {
        match self {
            ScoreKind::Distance => -score,
            ScoreKind::Similarity => score,
        }
    }
}

/// One matched image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub image_id: u64,
    pub score: f32,
}

/// Ranked matches for one query, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResults {
    pub kind: ScoreKind,
    pub hits: Vec<SearchHit>,
    /// Number of candidates scored before truncation.
    pub candidates_examined: usize,
}

impl MatchResults {
    /// A result with no matches.
    pub fn empty(kind: ScoreKind) -> Self {
        MatchResults {
            kind,
            hits: Vec::new(),
            candidates_examined: 0,
        }
    }

    /// Sort scored candidates best first (ties by ascending id) and keep at
    /// most `limit`.
    pub fn ranked(kind: ScoreKind, mut hits: Vec<SearchHit>, limit: usize) -> Self {
        let candidates_examined = hits.len();
        sort_hits(kind, &mut hits);
        hits.truncate(limit);
        MatchResults {
            kind,
            hits,
            candidates_examined,
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Matched image ids, best first.
    pub fn image_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|hit| hit.image_id).collect()
    }

    /// Best match, if any.
    pub fn best(&self) -> Option<&SearchHit> {
        self.hits.first()
    }

    /// Higher-is-better value of every hit, in rank order.
    pub fn relevances(&self) -> Vec<f32> {
        self.hits
            .iter()
            .map(|hit| self.kind.relevance(hit.score))
            .collect()
    }

    /// Rank of `image_id`, if it was matched.
    pub fn position(&self, image_id: u64) -> Option<usize> {
        self.hits.iter().position(|hit| hit.image_id == image_id)
    }
}

/// Sort best first; equal scores order by ascending image id.
pub(crate) fn sort_hits(kind: ScoreKind, hits: &mut [SearchHit]) {
    hits.sort_unstable_by(|a, b| {
        kind.compare(a.score, b.score)
            .then_with(|| a.image_id.cmp(&b.image_id))
    });
}

/// Operations shared by both engines.
pub trait SearchIndex: Send + Sync + Debug {
    /// Kind of score this engine produces.
    fn score_kind(&self) -> ScoreKind;

    /// Whether the index holds trained data.
    fn is_trained(&self) -> bool;

    /// Rank dataset images against the features of `image`. An untrained
    /// index or a query without features yields an empty result.
    fn search_image(&self, dataset: &dyn Dataset, image: &Image, limit: usize) -> MatchResults;

    /// Run many queries in parallel on the current rayon pool.
    fn search_batch(&self, dataset: &dyn Dataset, images: &[Image], limit: usize) -> Vec<MatchResults> {
        images
            .par_iter()
            .map(|image| self.search_image(dataset, image, limit))
            .collect()
    }

    /// Persist the index under `name`.
    fn save(&self, storage: &dyn Storage, name: &str) -> Result<()>;

    /// Replace this index with the one stored under `name`. On failure the
    /// index is left empty.
    fn load(&mut self, storage: &dyn Storage, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(image_id: u64, score: f32) -> SearchHit {
        SearchHit { image_id, score }
    }

    #[test]
    fn test_distance_ranking() {
        let results = MatchResults::ranked(
            ScoreKind::Distance,
            vec![hit(3, 0.5), hit(1, 0.2), hit(2, 0.5), hit(0, 0.9)],
            3,
        );
        assert_eq!(results.image_ids(), vec![1, 2, 3]);
        assert_eq!(results.candidates_examined, 4);
        assert_eq!(results.relevances(), vec![-0.2, -0.5, -0.5]);
    }

    #[test]
    fn test_similarity_ranking() {
        let results = MatchResults::ranked(
            ScoreKind::Similarity,
            vec![hit(5, 0.1), hit(4, 0.7), hit(9, 0.7)],
            10,
        );
        assert_eq!(results.image_ids(), vec![4, 9, 5]);
        assert_eq!(results.best().map(|h| h.image_id), Some(4));
        assert_eq!(results.position(5), Some(2));
        assert_eq!(results.position(6), None);
    }

    #[test]
    fn test_empty_results() {
        let results = MatchResults::empty(ScoreKind::Similarity);
        assert!(results.is_empty());
        assert_eq!(results.len(), 0);
        assert!(results.best().is_none());
    }
}
