//! Command implementations for the vocabtree CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::clustering::{KMeansParams, LloydKMeans};
use crate::codebook::{self, Codebook, FlatCodebook};
use crate::config::EngineConfig;
use crate::dataset::{self, Dataset, Image, SimpleDataset};
use crate::error::{Result, VocabTreeError};
use crate::parallel::{ExecutionMode, Executor};
use crate::search::inverted_index::{self, InvertedIndex};
use crate::search::vocab_tree::VocabTree;
use crate::search::{MatchResults, SearchIndex};
use crate::storage::{FileStorage, Storage, StorageConfig};

/// Execute a CLI command.
pub fn execute_command(args: VocabTreeArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let executor = Executor::new(config.execution)?;
    log::debug!("Running with {} worker threads", executor.num_threads());

    match &args.command {
        Command::BuildCodebook(build) => build_codebook(build, &config, &executor, &args),
        Command::BuildTree(build) => build_tree(build, &config, &executor, &args),
        Command::BuildIndex(build) => build_index(build, &config, &executor, &args),
        Command::Search(search) => search_images(search, &config, &executor, &args),
        Command::Info(info) => show_info(info, &config, &args),
    }
}

/// Merge the configuration file with command line overrides.
pub fn resolve_config(args: &VocabTreeArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.execution = match threads {
            1 => ExecutionMode::SingleThreaded,
            n => ExecutionMode::MultiThreaded { num_threads: n },
        };
    }
    if let Some(strategy) = args.cache_strategy {
        config.cache.strategy = strategy;
    }
    if let Some(capacity) = args.cache_capacity {
        config.cache.capacity = capacity;
    }
    Ok(config)
}

fn open_dataset(args: &DatasetArgs, config: &EngineConfig, executor: &Executor) -> Result<SimpleDataset> {
    SimpleDataset::open(
        &args.dataset,
        args.mapping_path(),
        config.cache,
        executor.num_threads(),
    )
}

/// Storage rooted at the parent directory of `path`, plus the file name.
fn storage_for(path: &Path) -> Result<(FileStorage, String)> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| VocabTreeError::invalid_config(format!("not a file path: {}", path.display())))?
        .to_string();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((FileStorage::new(directory, StorageConfig::default())?, name))
}

fn load_codebook(path: &Path) -> Result<FlatCodebook> {
    let (storage, name) = storage_for(path)?;
    FlatCodebook::load(&storage, &name)
}

fn build_codebook(
    args: &BuildCodebookArgs,
    config: &EngineConfig,
    executor: &Executor,
    cli_args: &VocabTreeArgs,
) -> Result<()> {
    let start = Instant::now();
    let dataset = open_dataset(&args.dataset, config, executor)?;
    let words = args.words.unwrap_or(config.codebook_words);
    let images = dataset.all_images();

    let kmeans = LloydKMeans::new(KMeansParams {
        seed: args.seed,
        ..KMeansParams::default()
    });
    let (codebook, samples, encoded) = executor.install(|| -> Result<_> {
        let samples = dataset::sample_descriptors(&dataset, &images, args.max_descriptors, args.seed)?;
        let codebook = FlatCodebook::train(&samples, words, &kmeans)?;
        let encoded = codebook::encode_images(&codebook, &dataset, &images)?;
        Ok((codebook, samples.rows(), encoded))
    })?;

    let path = args
        .dataset
        .output_path(args.output.as_deref(), &format!("codebook.{words}.bin"));
    let (storage, name) = storage_for(&path)?;
    codebook.save(&storage, &name)?;

    output_result(
        "Codebook trained",
        &CodebookBuildResult {
            path: path.display().to_string(),
            words: codebook.num_words(),
            dimension: codebook.dimension(),
            training_descriptors: samples,
            images_encoded: encoded,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

fn build_tree(
    args: &BuildTreeArgs,
    config: &EngineConfig,
    executor: &Executor,
    cli_args: &VocabTreeArgs,
) -> Result<()> {
    let start = Instant::now();
    let mut params = config.tree;
    if let Some(split) = args.split {
        params.split = split;
    }
    if let Some(depth) = args.depth {
        params.depth = depth;
    }
    if args.max_descriptors.is_some() {
        params.max_training_descriptors = args.max_descriptors;
    }
    if args.seed.is_some() {
        params.seed = args.seed;
    }

    let kmeans = LloydKMeans::new(KMeansParams {
        seed: params.seed,
        ..KMeansParams::default()
    });
    let mut tree = VocabTree::with_kmeans(params, Arc::new(kmeans));
    params.validate()?;

    let dataset = open_dataset(&args.dataset, config, executor)?;
    let images = match args.images {
        Some(count) => dataset.random_images(count),
        None => dataset.all_images(),
    };
    let indexed = executor.install(|| tree.train(&dataset, &images))?;

    let path = args
        .dataset
        .output_path(args.output.as_deref(), &params.file_name());
    let (storage, name) = storage_for(&path)?;
    tree.save(&storage, &name)?;

    output_result(
        "Vocabulary tree trained",
        &TreeBuildResult {
            path: path.display().to_string(),
            split: tree.split(),
            depth: tree.depth(),
            nodes: tree.number_of_nodes(),
            images_indexed: indexed,
            images_supplied: images.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

fn build_index(
    args: &BuildIndexArgs,
    config: &EngineConfig,
    executor: &Executor,
    cli_args: &VocabTreeArgs,
) -> Result<()> {
    let start = Instant::now();
    let codebook = load_codebook(&args.codebook)?;
    let dataset = open_dataset(&args.dataset, config, executor)?;
    let images = dataset.all_images();

    let mut index = InvertedIndex::new(config.index);
    let (encoded, indexed) = executor.install(|| -> Result<_> {
        let encoded = if args.encode {
            Some(codebook::encode_images(&codebook, &dataset, &images)?)
        } else {
            None
        };
        let indexed = index.train(&codebook, &dataset, &images)?;
        Ok((encoded, indexed))
    })?;

    let path = args.dataset.output_path(
        args.output.as_deref(),
        &inverted_index::file_name(codebook.num_words()),
    );
    let (storage, name) = storage_for(&path)?;
    index.save(&storage, &name)?;

    output_result(
        "Inverted index built",
        &IndexBuildResult {
            path: path.display().to_string(),
            words: index.num_clusters(),
            images_encoded: encoded,
            images_indexed: indexed,
            images_supplied: images.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

fn load_engine(path: &Path, engine: EngineKind, config: &EngineConfig) -> Result<Box<dyn SearchIndex>> {
    let (storage, name) = storage_for(path)?;
    let mut index: Box<dyn SearchIndex> = match engine {
        EngineKind::Tree => Box::new(VocabTree::with_kmeans(
            config.tree,
            Arc::new(LloydKMeans::default()),
        )),
        EngineKind::Index => Box::new(InvertedIndex::new(config.index)),
    };
    index.load(&storage, &name)?;
    Ok(index)
}

fn search_images(
    args: &SearchArgs,
    config: &EngineConfig,
    executor: &Executor,
    cli_args: &VocabTreeArgs,
) -> Result<()> {
    let mut config = *config;
    if let Some(cutoff) = args.cutoff {
        config.index.cutoff = cutoff;
    }
    let engine = load_engine(&args.index, args.engine, &config)?;
    let dataset = open_dataset(&args.dataset, &config, executor)?;

    let queries: Vec<Image> = if args.queries.is_empty() {
        dataset.all_images()
    } else {
        args.queries
            .iter()
            .map(|&id| {
                dataset
                    .image(id)
                    .ok_or_else(|| VocabTreeError::not_found(format!("image {id}")))
            })
            .collect::<Result<_>>()?
    };

    let start = Instant::now();
    let results: Vec<MatchResults> =
        executor.install(|| engine.search_batch(&dataset, &queries, args.limit));
    let duration_ms = start.elapsed().as_millis() as u64;

    let cache = match args.engine {
        EngineKind::Tree => dataset.vec_cache().stats(),
        EngineKind::Index => dataset.bow_cache().stats(),
    };
    let report = SearchReport {
        engine: args.engine,
        score_kind: engine.score_kind(),
        queries: queries
            .iter()
            .zip(results)
            .map(|(query, results)| QueryMatches {
                query_id: query.id,
                query_path: Some(query.path.clone()),
                hits: results
                    .hits
                    .into_iter()
                    .map(|hit| NamedHit {
                        hit,
                        path: dataset.image(hit.image_id).map(|image| image.path),
                    })
                    .collect(),
            })
            .collect(),
        duration_ms,
        cache: Some(cache),
    };
    output_search(&report, cli_args)
}

fn show_info(args: &InfoArgs, config: &EngineConfig, cli_args: &VocabTreeArgs) -> Result<()> {
    let (storage, name) = storage_for(&args.index)?;
    let size_bytes = storage.file_size(&name)?;

    let info = match args.engine {
        EngineKind::Tree => {
            let mut tree = VocabTree::with_kmeans(config.tree, Arc::new(LloydKMeans::default()));
            tree.load(&storage, &name)?;
            let lists: Vec<usize> = (0..tree.num_leaves())
                .filter_map(|leaf| tree.leaf_postings(leaf).map(|postings| postings.len()))
                .collect();
            IndexInfo {
                path: args.index.display().to_string(),
                engine: EngineKind::Tree,
                size_bytes,
                entries: tree.number_of_nodes(),
                split: Some(tree.split()),
                depth: Some(tree.depth()),
                images: Some(tree.num_images()),
                non_empty_lists: lists.iter().filter(|&&len| len > 0).count(),
                longest_list: lists.into_iter().max().unwrap_or(0),
            }
        }
        EngineKind::Index => {
            let mut index = InvertedIndex::new(config.index);
            index.load(&storage, &name)?;
            let lists: Vec<usize> = (0..index.num_clusters() as u32)
                .map(|word| index.postings(word).len())
                .collect();
            IndexInfo {
                path: args.index.display().to_string(),
                engine: EngineKind::Index,
                size_bytes,
                entries: index.num_clusters(),
                split: None,
                depth: None,
                images: None,
                non_empty_lists: lists.iter().filter(|&&len| len > 0).count(),
                longest_list: lists.into_iter().max().unwrap_or(0),
            }
        }
    };

    output_result("Index statistics", &info, cli_args)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::CacheStrategy;

    #[test]
    fn test_resolve_config_overrides() {
        let args = VocabTreeArgs::parse_from([
            "vocabtree",
            "-t",
            "1",
            "--cache-capacity",
            "0",
            "--cache-strategy",
            "ring",
            "info",
            "tree.bin",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.execution, ExecutionMode::SingleThreaded);
        assert_eq!(config.cache.capacity, 0);
        assert_eq!(config.cache.strategy, CacheStrategy::Ring);
    }

    #[test]
    fn test_resolve_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"tree": {"split": 4, "depth": 2}}"#).unwrap();

        let args = VocabTreeArgs::parse_from([
            "vocabtree",
            "--config",
            path.to_str().unwrap(),
            "info",
            "tree.bin",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.tree.split, 4);
        assert_eq!(config.tree.depth, 2);
    }

    #[test]
    fn test_storage_for() {
        let dir = TempDir::new().unwrap();
        let (storage, name) = storage_for(&dir.path().join("tree.bin")).unwrap();
        assert_eq!(name, "tree.bin");
        assert_eq!(storage.directory(), dir.path());
        assert!(storage_for(Path::new("/")).is_err());
    }
}
