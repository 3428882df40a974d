//! In-memory dataset for tests and programmatic use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use super::{Dataset, DescriptorMatrix, Image};
use crate::error::Result;
use crate::numerics::{SparseVector, canonicalize};

#[derive(Debug, Default)]
struct Features {
    descriptors: AHashMap<u64, DescriptorMatrix>,
    bow: AHashMap<u64, Arc<SparseVector>>,
    vec: AHashMap<u64, Arc<Vec<f32>>>,
}

/// A dataset whose images and features live in memory.
#[derive(Debug, Default)]
pub struct MemoryDataset {
    images: RwLock<BTreeMap<u64, Image>>,
    features: RwLock<Features>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image under the next free id and return that id.
    pub fn add_image<S: Into<String>>(&self, path: S) -> u64 {
        let mut images = self.images.write();
        let id = images.keys().next_back().map_or(0, |last| last + 1);
        images.insert(id, Image::new(id, path));
        id
    }

    /// Register an image under a caller-chosen id. Returns false on an id collision.
    pub fn insert_image(&self, image: Image) -> bool {
        let mut images = self.images.write();
        if images.contains_key(&image.id) {
            return false;
        }
        images.insert(image.id, image);
        true
    }

    /// Attach local descriptors to an image.
    pub fn set_descriptors(&self, id: u64, descriptors: DescriptorMatrix) {
        self.features.write().descriptors.insert(id, descriptors);
    }

    /// Attach a bag-of-words vector to an image.
    pub fn set_bow(&self, id: u64, mut vector: SparseVector) {
        canonicalize(&mut vector);
        self.features.write().bow.insert(id, Arc::new(vector));
    }
}

impl Dataset for MemoryDataset {
    fn num_images(&self) -> usize {
        self.images.read().len()
    }

    fn image(&self, id: u64) -> Option<Image> {
        self.images.read().get(&id).cloned()
    }

    fn all_images(&self) -> Vec<Image> {
        self.images.read().values().cloned().collect()
    }

    fn location(&self, relative: &Path) -> PathBuf {
        relative.to_path_buf()
    }

    fn load_descriptors(&self, image: &Image) -> Option<DescriptorMatrix> {
        let descriptors = self.features.read().descriptors.get(&image.id).cloned();
        if descriptors.is_none() {
            log::warn!("No descriptors for image {} ({})", image.id, image.path);
        }
        descriptors
    }

    fn load_bow_feature(&self, id: u64) -> Option<Arc<SparseVector>> {
        self.features.read().bow.get(&id).cloned()
    }

    fn load_vec_feature(&self, id: u64) -> Option<Arc<Vec<f32>>> {
        self.features.read().vec.get(&id).cloned()
    }

    fn store_bow_feature(&self, id: u64, vector: &[(u32, f32)]) -> Result<()> {
        self.set_bow(id, vector.to_vec());
        Ok(())
    }

    fn store_vec_feature(&self, id: u64, vector: &[f32]) -> Result<()> {
        self.features
            .write()
            .vec
            .insert(id, Arc::new(vector.to_vec()));
        Ok(())
    }
}
