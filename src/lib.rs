//! # vocabtree
//!
//! Content-based image retrieval over local feature descriptors.
//!
//! ## Features
//!
//! - Hierarchical vocabulary tree with idf-weighted path vectors
//! - Flat inverted index with weighted min-histogram scoring
//! - Sharded LRU caches for per-image feature vectors
//! - Pluggable k-means and storage backends
//! - Parallel training and batch search on rayon

pub mod cache;
pub mod cli;
pub mod clustering;
pub mod codebook;
pub mod config;
pub mod dataset;
pub mod descriptor;
pub mod error;
pub mod numerics;
pub mod parallel;
pub mod search;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStrategy, LoadingCache};
    pub use crate::clustering::{KMeans, LloydKMeans};
    pub use crate::codebook::{Codebook, FlatCodebook};
    pub use crate::config::EngineConfig;
    pub use crate::dataset::{Dataset, DescriptorMatrix, Image, MemoryDataset, SimpleDataset};
    pub use crate::error::{Result, VocabTreeError};
    pub use crate::parallel::{ExecutionMode, Executor};
    pub use crate::search::inverted_index::{InvertedIndex, InvertedIndexParams};
    pub use crate::search::vocab_tree::{TreeParams, VocabTree};
    pub use crate::search::{MatchResults, ScoreKind, SearchHit, SearchIndex};
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
