//! Engine configuration.
//!
//! Everything a run needs besides the data itself: tree shape, inverted
//! index cutoff, feature cache layout and thread pool size. Stored as JSON;
//! missing fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::Result;
use crate::parallel::ExecutionMode;
use crate::search::inverted_index::InvertedIndexParams;
use crate::search::vocab_tree::TreeParams;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tree: TreeParams,
    pub index: InvertedIndexParams,
    pub cache: CacheConfig,
    pub execution: ExecutionMode,
    /// Number of visual words when training a codebook.
    pub codebook_words: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tree: TreeParams::default(),
            index: InvertedIndexParams::default(),
            cache: CacheConfig::default(),
            execution: ExecutionMode::default(),
            codebook_words: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Reading configuration from {}", path.display());
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::CacheStrategy;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tree.split, 8);
        assert_eq!(config.tree.depth, 3);
        assert_eq!(config.index.cutoff, 4096);
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.cache.strategy, CacheStrategy::PriorityRing);
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(
            r#"{
                "tree": {"split": 10, "depth": 6},
                "cache": {"strategy": "ring"},
                "execution": {"mode": "multi_threaded", "num_threads": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(config.tree.split, 10);
        assert_eq!(config.tree.depth, 6);
        assert_eq!(config.cache.strategy, CacheStrategy::Ring);
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.execution, ExecutionMode::MultiThreaded { num_threads: 4 });
        assert_eq!(config.index.cutoff, 4096);
    }

    #[test]
    fn test_invalid_tree_is_rejected() {
        assert!(EngineConfig::from_json(r#"{"tree": {"split": 1}}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        let mut config = EngineConfig::default();
        config.index.cutoff = 100;
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
