//! Command line argument parsing for the vocabtree CLI using clap.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStrategy;

/// vocabtree - content-based image retrieval over local feature descriptors
#[derive(Parser, Debug, Clone)]
#[command(name = "vocabtree")]
#[command(about = "Train and query vocabulary trees and inverted indexes over image features")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct VocabTreeArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "VOCABTREE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Worker threads (0 = one per CPU, 1 = single-threaded)
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Feature cache strategy
    #[arg(long, value_parser = parse_cache_strategy, global = true)]
    pub cache_strategy: Option<CacheStrategy>,

    /// Feature cache capacity in entries (0 disables caching)
    #[arg(long, global = true)]
    pub cache_capacity: Option<usize>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl VocabTreeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

fn parse_cache_strategy(value: &str) -> Result<CacheStrategy, String> {
    value.parse().map_err(|e: crate::error::VocabTreeError| e.to_string())
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train a visual-word codebook and encode every image against it
    #[command(name = "build-codebook")]
    BuildCodebook(BuildCodebookArgs),

    /// Train a vocabulary tree over a dataset
    #[command(name = "build-tree")]
    BuildTree(BuildTreeArgs),

    /// Build an inverted index from bag-of-words features
    #[command(name = "build-index")]
    BuildIndex(BuildIndexArgs),

    /// Query a trained tree or index with dataset images
    Search(SearchArgs),

    /// Show statistics of a trained tree or index
    Info(InfoArgs),
}

/// Dataset location shared by every command that reads images.
#[derive(clap::Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset root (containing images/ and feats/)
    #[arg(value_name = "DATASET_ROOT")]
    pub dataset: PathBuf,

    /// Image id mapping file (default: <DATASET_ROOT>/images.map)
    #[arg(long, value_name = "MAPPING_FILE")]
    pub mapping: Option<PathBuf>,
}

impl DatasetArgs {
    pub fn mapping_path(&self) -> PathBuf {
        self.mapping
            .clone()
            .unwrap_or_else(|| self.dataset.join("images.map"))
    }

    /// Resolve an output path: explicit, or `name` under the dataset root.
    pub fn output_path(&self, explicit: Option<&Path>, name: &str) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.dataset.join(name))
    }
}

/// Arguments for training a codebook
#[derive(Parser, Debug, Clone)]
pub struct BuildCodebookArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Number of visual words
    #[arg(short = 'k', long)]
    pub words: Option<usize>,

    /// Cluster at most this many sampled descriptors
    #[arg(long)]
    pub max_descriptors: Option<usize>,

    /// Random seed for sampling and k-means seeding
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output file (default: <DATASET_ROOT>/codebook.<K>.bin)
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments for training a vocabulary tree
#[derive(Parser, Debug, Clone)]
pub struct BuildTreeArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Children per node
    #[arg(long)]
    pub split: Option<u32>,

    /// Number of tree levels
    #[arg(long)]
    pub depth: Option<u32>,

    /// Cluster at most this many sampled descriptors
    #[arg(long)]
    pub max_descriptors: Option<usize>,

    /// Train on this many randomly chosen images instead of all of them
    #[arg(long)]
    pub images: Option<usize>,

    /// Random seed for descriptor sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output file (default: <DATASET_ROOT>/tree.<SPLIT>.<DEPTH>.bin)
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments for building an inverted index
#[derive(Parser, Debug, Clone)]
pub struct BuildIndexArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Codebook file written by build-codebook
    #[arg(long, value_name = "CODEBOOK_FILE")]
    pub codebook: PathBuf,

    /// Re-encode bag-of-words features from descriptors first
    #[arg(long)]
    pub encode: bool,

    /// Output file (default: <DATASET_ROOT>/index.<K>.bin)
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Tree or index file to search
    #[arg(long, value_name = "INDEX_FILE")]
    pub index: PathBuf,

    /// Kind of index stored in INDEX_FILE
    #[arg(short, long, default_value = "tree")]
    pub engine: EngineKind,

    /// Query image ids (default: every image)
    #[arg(value_name = "IMAGE_ID")]
    pub queries: Vec<u64>,

    /// Maximum number of results per query
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Inverted index candidate cutoff
    #[arg(long)]
    pub cutoff: Option<usize>,
}

/// Arguments for showing index statistics
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    /// Tree or index file
    #[arg(value_name = "INDEX_FILE")]
    pub index: PathBuf,

    /// Kind of index stored in INDEX_FILE
    #[arg(short, long, default_value = "tree")]
    pub engine: EngineKind,
}

/// Which engine a file belongs to.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Vocabulary tree
    Tree,
    /// Flat inverted index
    Index,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity() {
        let args = VocabTreeArgs::parse_from(["vocabtree", "info", "tree.bin"]);
        assert_eq!(args.verbosity(), 1);

        let args = VocabTreeArgs::parse_from(["vocabtree", "-vv", "info", "tree.bin"]);
        assert_eq!(args.verbosity(), 2);

        let args = VocabTreeArgs::parse_from(["vocabtree", "-q", "-vvv", "info", "tree.bin"]);
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_build_tree_args() {
        let args = VocabTreeArgs::parse_from([
            "vocabtree",
            "build-tree",
            "/data/oxford",
            "--split",
            "10",
            "--depth",
            "6",
            "--cache-strategy",
            "per-thread",
        ]);
        assert_eq!(args.cache_strategy, Some(CacheStrategy::PerThread));
        match args.command {
            Command::BuildTree(tree) => {
                assert_eq!(tree.split, Some(10));
                assert_eq!(tree.depth, Some(6));
                assert_eq!(tree.dataset.mapping_path(), PathBuf::from("/data/oxford/images.map"));
                assert_eq!(
                    tree.dataset.output_path(None, "tree.10.6.bin"),
                    PathBuf::from("/data/oxford/tree.10.6.bin")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_search_args() {
        let args = VocabTreeArgs::parse_from([
            "vocabtree", "-f", "json", "search", "/data", "--index", "index.bin", "-e", "index", "3",
            "7", "-l", "5",
        ]);
        assert_eq!(args.output_format, OutputFormat::Json);
        match args.command {
            Command::Search(search) => {
                assert_eq!(search.engine, EngineKind::Index);
                assert_eq!(search.queries, vec![3, 7]);
                assert_eq!(search.limit, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
