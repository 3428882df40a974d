//! Image collections and per-image feature access.
//!
//! A [`Dataset`] maps stable integer ids to images and knows where each
//! image's features live. The engines never touch the filesystem directly:
//! descriptors, bag-of-words vectors and tree document vectors are all
//! fetched through the dataset, which may cache them.

pub mod features;
pub mod memory;
pub mod simple;

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use crate::descriptor::DescriptorMatrix;
use crate::error::{Result, VocabTreeError};
use crate::numerics::SparseVector;
pub use memory::MemoryDataset;
pub use simple::SimpleDataset;

/// Directory holding image files, relative to the dataset root.
pub const IMAGES_DIR: &str = "images";
/// Directory holding feature files, relative to the dataset root.
pub const FEATS_DIR: &str = "feats";

/// An image known to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    /// Unique id within the dataset.
    pub id: u64,
    /// Path of the image file relative to the `images/` directory.
    pub path: String,
}

impl Image {
    pub fn new<S: Into<String>>(id: u64, path: S) -> Self {
        Image {
            id,
            path: path.into(),
        }
    }

    /// Image file location relative to the dataset root.
    pub fn location(&self) -> PathBuf {
        Path::new(IMAGES_DIR).join(&self.path)
    }

    /// Location of the named feature relative to the dataset root:
    /// `feats/<feature>/<path without extension>.<feature>`.
    pub fn feature_path(&self, feature: &str) -> PathBuf {
        Path::new(FEATS_DIR)
            .join(feature)
            .join(Path::new(&self.path).with_extension(feature))
    }
}

/// An enumerable image collection with feature loaders.
///
/// Loaders return `None` for missing or unreadable data; the failure is
/// logged and the caller skips the image.
pub trait Dataset: Send + Sync + Debug {
    /// Number of images.
    fn num_images(&self) -> usize;

    /// Look up an image by id.
    fn image(&self, id: u64) -> Option<Image>;

    /// Every image, ascending by id.
    fn all_images(&self) -> Vec<Image>;

    /// Up to `count` distinct images drawn uniformly at random.
    fn random_images(&self, count: usize) -> Vec<Image> {
        let mut images = self.all_images();
        images.shuffle(&mut rand::rng());
        images.truncate(count);
        images
    }

    /// Absolute location of a path relative to the dataset root.
    fn location(&self, relative: &Path) -> PathBuf;

    /// Local feature descriptors of an image.
    fn load_descriptors(&self, image: &Image) -> Option<DescriptorMatrix>;

    /// Bag-of-words vector of an image, ascending by word id.
    fn load_bow_feature(&self, id: u64) -> Option<Arc<SparseVector>>;

    /// Tree document vector of an image.
    fn load_vec_feature(&self, id: u64) -> Option<Arc<Vec<f32>>>;

    /// Persist an image's bag-of-words vector.
    fn store_bow_feature(&self, id: u64, vector: &[(u32, f32)]) -> Result<()>;

    /// Persist an image's tree document vector.
    fn store_vec_feature(&self, id: u64, vector: &[f32]) -> Result<()>;
}

/// Concatenate the descriptors of `images`, uniformly subsampled down to
/// `limit` rows when given. Images without descriptors, or whose dimension
/// differs from the first loaded image, are left out.
pub fn sample_descriptors(
    dataset: &dyn Dataset,
    images: &[Image],
    limit: Option<usize>,
    seed: Option<u64>,
) -> Result<DescriptorMatrix> {
    let loaded: Vec<DescriptorMatrix> = images
        .par_iter()
        .filter_map(|image| dataset.load_descriptors(image))
        .filter(|descriptors| !descriptors.is_empty())
        .collect();

    let Some(first) = loaded.first() else {
        return Err(VocabTreeError::dataset("no image has descriptors"));
    };
    let dimension = first.dimension();

    let (matching, mismatched): (Vec<DescriptorMatrix>, Vec<DescriptorMatrix>) = loaded
        .into_iter()
        .partition(|descriptors| descriptors.dimension() == dimension);
    for descriptors in &mismatched {
        log::warn!(
            "Ignoring {} descriptors of dimension {} (expected {dimension})",
            descriptors.rows(),
            descriptors.dimension()
        );
    }
    let samples = DescriptorMatrix::concat(&matching)?;

    match limit {
        Some(limit) if limit > 0 && samples.rows() > limit => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            let mut picked = rand::seq::index::sample(&mut rng, samples.rows(), limit).into_vec();
            picked.sort_unstable();
            log::debug!("Sampled {limit} of {} descriptors", samples.rows());
            Ok(samples.select_rows(&picked))
        }
        _ => Ok(samples),
    }
}
