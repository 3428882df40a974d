//! Flat inverted index over a codebook's visual words.
//!
//! Every word keeps the ids of the images whose bag-of-words vector contains
//! it. A query first counts how many words each candidate shares with it,
//! keeps the best `cutoff` candidates by that count, and then ranks them by
//! idf-weighted min-histogram intersection.

mod io;

use std::borrow::Cow;
use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::codebook::Codebook;
use crate::dataset::{Dataset, Image};
use crate::error::{Result, VocabTreeError};
use crate::numerics::{SparseVector, canonicalize, is_canonical, min_hist};
use crate::search::{MatchResults, ScoreKind, SearchHit, SearchIndex};
use crate::storage::Storage;

/// Search-time parameters of an [`InvertedIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertedIndexParams {
    /// Candidates kept after counting shared words.
    pub cutoff: usize,
}

impl Default for InvertedIndexParams {
    fn default() -> Self {
        InvertedIndexParams { cutoff: 4096 }
    }
}

/// Conventional file name for an index over `num_words` words.
pub fn file_name(num_words: usize) -> String {
    format!("index.{num_words}.bin")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedIndex {
    params: InvertedIndexParams,
    idf: Vec<f32>,
    /// Image ids per word, ascending.
    postings: Vec<Vec<u64>>,
}

impl InvertedIndex {
    pub fn new(params: InvertedIndexParams) -> Self {
        InvertedIndex {
            params,
            ..Self::default()
        }
    }

    pub fn params(&self) -> &InvertedIndexParams {
        &self.params
    }

    pub fn set_cutoff(&mut self, cutoff: usize) {
        self.params.cutoff = cutoff;
    }

    /// Size of the word space.
    pub fn num_clusters(&self) -> usize {
        self.idf.len()
    }

    /// Image ids containing `word`, ascending. Empty for unknown words.
    pub fn postings(&self, word: u32) -> &[u64] {
        self.postings
            .get(word as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn idf_weights(&self) -> &[f32] {
        &self.idf
    }

    pub fn is_trained(&self) -> bool {
        !self.idf.is_empty()
    }

    pub fn clear(&mut self) {
        self.idf.clear();
        self.postings.clear();
    }

    /// Index the bag-of-words vectors of `images` over the codebook's words.
    /// Images without a vector are skipped but still count towards the idf
    /// denominator. Returns the number of images indexed.
    pub fn train(&mut self, codebook: &dyn Codebook, dataset: &dyn Dataset, images: &[Image]) -> Result<usize> {
        let vectors: Vec<(u64, Arc<SparseVector>)> = images
            .par_iter()
            .filter_map(|image| {
                let vector = dataset.load_bow_feature(image.id);
                if vector.is_none() {
                    log::warn!("Skipping image {}: no bag-of-words vector", image.id);
                }
                vector.map(|vector| (image.id, vector))
            })
            .collect();

        self.build(
            codebook.num_words(),
            images.len(),
            vectors.iter().map(|(id, vector)| (*id, vector.as_slice())),
        )
    }

    /// Index in-memory bag-of-words vectors; every supplied vector counts
    /// towards the idf denominator.
    pub fn train_from_vectors<I>(&mut self, num_words: usize, vectors: I) -> Result<usize>
    where
        I: IntoIterator<Item = (u64, SparseVector)>,
    {
        let vectors: Vec<(u64, SparseVector)> = vectors.into_iter().collect();
        self.build(
            num_words,
            vectors.len(),
            vectors.iter().map(|(id, vector)| (*id, vector.as_slice())),
        )
    }

    fn build<'a, I>(&mut self, num_words: usize, total: usize, vectors: I) -> Result<usize>
    where
        I: Iterator<Item = (u64, &'a [(u32, f32)])>,
    {
        if num_words == 0 {
            return Err(VocabTreeError::invalid_config("an inverted index needs at least one word"));
        }
        if u32::try_from(num_words).is_err() {
            return Err(VocabTreeError::invalid_config(format!("{num_words} words do not fit in u32")));
        }

        let mut postings: Vec<Vec<u64>> = vec![Vec::new(); num_words];
        let mut indexed = 0;
        let mut out_of_range = 0usize;
        for (id, vector) in vectors {
            for &(word, _) in vector {
                match postings.get_mut(word as usize) {
                    Some(list) => list.push(id),
                    None => out_of_range += 1,
                }
            }
            indexed += 1;
        }
        if out_of_range > 0 {
            log::warn!("Ignored {out_of_range} entries with word ids beyond {num_words}");
        }

        postings.par_iter_mut().for_each(|list| {
            list.sort_unstable();
            list.dedup();
        });
        let idf = postings
            .iter()
            .map(|list| {
                if list.is_empty() || total == 0 {
                    0.0
                } else {
                    (total as f64 / list.len() as f64).ln() as f32
                }
            })
            .collect();

        self.postings = postings;
        self.idf = idf;
        log::info!("Indexed {indexed} of {total} images over {num_words} words");
        Ok(indexed)
    }

    /// Rank images against the stored bag-of-words vector of `image`.
    pub fn search(&self, dataset: &dyn Dataset, image: &Image, limit: usize) -> MatchResults {
        match dataset.load_bow_feature(image.id) {
            Some(query) => self.search_bow(dataset, &query, limit),
            None => {
                log::debug!("No bag-of-words vector for query image {}", image.id);
                MatchResults::empty(ScoreKind::Similarity)
            }
        }
    }

    /// Rank images against a query vector, loading candidate vectors through
    /// the dataset.
    pub fn search_bow(&self, dataset: &dyn Dataset, query: &[(u32, f32)], limit: usize) -> MatchResults {
        self.search_with(query, limit, |id| dataset.load_bow_feature(id))
    }

    /// Rank images against a query vector with candidate vectors supplied by
    /// `vector_of`.
    pub fn search_with<F>(&self, query: &[(u32, f32)], limit: usize, vector_of: F) -> MatchResults
    where
        F: Fn(u64) -> Option<Arc<SparseVector>> + Sync,
    {
        if !self.is_trained() || query.is_empty() {
            return MatchResults::empty(ScoreKind::Similarity);
        }
        let query: Cow<'_, [(u32, f32)]> = if is_canonical(query) {
            Cow::Borrowed(query)
        } else {
            let mut sorted = query.to_vec();
            canonicalize(&mut sorted);
            Cow::Owned(sorted)
        };

        let candidates = self.shortlist(&query);
        let hits: Vec<SearchHit> = candidates
            .par_iter()
            .filter_map(|&image_id| {
                let vector = vector_of(image_id)?;
                Some(SearchHit {
                    image_id,
                    score: min_hist(&query, &vector, &self.idf),
                })
            })
            .collect();

        MatchResults::ranked(ScoreKind::Similarity, hits, limit)
    }

    /// Images sharing the most words with `query`, at most `cutoff` of them.
    fn shortlist(&self, query: &[(u32, f32)]) -> Vec<u64> {
        let mut shared: AHashMap<u64, u32> = AHashMap::new();
        for &(word, _) in query {
            for &id in self.postings(word) {
                *shared.entry(id).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(u64, u32)> = shared.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.params.cutoff);
        log::trace!("Shortlisted {} candidates", ranked.len());
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

impl SearchIndex for InvertedIndex {
    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    fn is_trained(&self) -> bool {
        InvertedIndex::is_trained(self)
    }

    fn search_image(&self, dataset: &dyn Dataset, image: &Image, limit: usize) -> MatchResults {
        self.search(dataset, image, limit)
    }

    fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        InvertedIndex::save(self, storage, name)
    }

    fn load(&mut self, storage: &dyn Storage, name: &str) -> Result<()> {
        InvertedIndex::load(self, storage, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemoryDataset;

    fn words_7_and_9() -> (InvertedIndex, MemoryDataset) {
        let dataset = MemoryDataset::new();
        let vectors = vec![
            (10, vec![(7, 1.0), (9, 1.0)]),
            (11, vec![(7, 1.0)]),
            (12, vec![(7, 2.0)]),
        ];
        for (id, vector) in &vectors {
            dataset.insert_image(Image::new(*id, format!("{id}.jpg")));
            dataset.set_bow(*id, vector.clone());
        }
        let mut index = InvertedIndex::default();
        assert_eq!(index.train_from_vectors(16, vectors).unwrap(), 3);
        (index, dataset)
    }

    #[test]
    fn test_postings_and_idf() {
        let (index, _) = words_7_and_9();
        assert_eq!(index.num_clusters(), 16);
        assert_eq!(index.postings(7), &[10, 11, 12]);
        assert_eq!(index.postings(9), &[10]);
        assert!(index.postings(3).is_empty());
        assert!(index.postings(99).is_empty());
        assert_eq!(index.idf_weights()[7], 0.0);
        assert!((index.idf_weights()[9] - 3f32.ln()).abs() < 1e-6);
        assert_eq!(index.idf_weights()[0], 0.0);
    }

    #[test]
    fn test_rare_word_query() {
        let (index, dataset) = words_7_and_9();
        let results = index.search_bow(&dataset, &[(9, 1.0)], 10);
        assert_eq!(results.image_ids(), vec![10]);
        assert_eq!(results.kind, ScoreKind::Similarity);
        assert!(results.hits[0].score > 0.0);
    }

    #[test]
    fn test_cutoff_prefers_more_shared_words() {
        let (mut index, dataset) = words_7_and_9();
        index.set_cutoff(1);
        let results = index.search_bow(&dataset, &[(9, 1.0), (7, 1.0)], 10);
        assert_eq!(results.image_ids(), vec![10]);

        index.set_cutoff(2);
        let results = index.search_bow(&dataset, &[(7, 1.0)], 10);
        assert_eq!(results.candidates_examined, 2);
        // Equal counts keep the smaller ids.
        let mut ids = results.image_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn test_missing_query_vector() {
        let (index, dataset) = words_7_and_9();
        dataset.insert_image(Image::new(20, "none.jpg"));
        let image = dataset.image(20).unwrap();
        assert!(index.search(&dataset, &image, 5).is_empty());
        assert!(InvertedIndex::default().search_bow(&dataset, &[(7, 1.0)], 5).is_empty());
    }

    #[test]
    fn test_unsorted_query_is_canonicalized() {
        let (index, dataset) = words_7_and_9();
        let sorted = index.search_bow(&dataset, &[(7, 1.0), (9, 1.0)], 10);
        let unsorted = index.search_bow(&dataset, &[(9, 1.0), (7, 1.0)], 10);
        assert_eq!(sorted, unsorted);
    }

    #[test]
    fn test_empty_training_set() {
        let mut index = InvertedIndex::default();
        assert_eq!(index.train_from_vectors(4, Vec::new()).unwrap(), 0);
        assert!(index.is_trained());
        assert!(index.postings(0).is_empty());
        assert!(index.idf_weights().iter().all(|&w| w == 0.0));
        assert!(index.train_from_vectors(0, Vec::new()).is_err());
    }
}
