//! Directory-backed dataset.
//!
//! Layout under the dataset root:
//!
//! ```text
//! images/<relative path>                      image files
//! feats/<feature>/<relative path>.<feature>   feature files
//! ```
//!
//! The id mapping can be written to a file so later runs skip the directory
//! walk. Mapping format (little-endian): `count:u64`, then per image
//! `(id:u64, path_len:u16, path bytes)`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use walkdir::WalkDir;

use super::features::{self, BOW_DESCRIPTORS, DATAVEC, DESCRIPTORS};
use super::{Dataset, DescriptorMatrix, IMAGES_DIR, Image};
use crate::cache::{CacheConfig, LoadingCache};
use crate::error::{Result, VocabTreeError};
use crate::numerics::SparseVector;

#[derive(Debug, Default)]
struct ImageTable {
    by_id: BTreeMap<u64, Image>,
    by_path: AHashMap<String, u64>,
}

impl ImageTable {
    fn insert(&mut self, image: Image) -> bool {
        if self.by_id.contains_key(&image.id) || self.by_path.contains_key(&image.path) {
            return false;
        }
        self.by_path.insert(image.path.clone(), image.id);
        self.by_id.insert(image.id, image);
        true
    }
}

type BowCache = Box<dyn LoadingCache<u64, Option<Arc<SparseVector>>>>;
type VecCache = Box<dyn LoadingCache<u64, Option<Arc<Vec<f32>>>>>;

/// A dataset stored as a directory of images and feature files.
pub struct SimpleDataset {
    root: PathBuf,
    table: Arc<RwLock<ImageTable>>,
    bow_cache: BowCache,
    vec_cache: VecCache,
}

impl SimpleDataset {
    /// An empty dataset rooted at `root`. `shards` sizes the sharded caches
    /// and should match the worker count of the pool that searches it.
    pub fn new<P: AsRef<Path>>(root: P, cache: CacheConfig, shards: usize) -> Self {
        let root = root.as_ref().to_path_buf();
        let table = Arc::new(RwLock::new(ImageTable::default()));

        let bow_cache: BowCache = {
            let root = root.clone();
            let table = table.clone();
            cache.strategy.build(
                cache.capacity,
                shards,
                Arc::new(move |id: &u64| {
                    let path = feature_location(&root, &table, *id, BOW_DESCRIPTORS)?;
                    features::load_optional(&path, |r| features::read_sparse_vector(r)).map(Arc::new)
                }),
            )
        };

        let vec_cache: VecCache = {
            let root = root.clone();
            let table = table.clone();
            cache.strategy.build(
                cache.capacity,
                shards,
                Arc::new(move |id: &u64| {
                    let path = feature_location(&root, &table, *id, DATAVEC)?;
                    features::load_optional(&path, |r| features::read_data_vector(r)).map(Arc::new)
                }),
            )
        };

        SimpleDataset {
            root,
            table,
            bow_cache,
            vec_cache,
        }
    }

    /// Build a dataset from every file under `<root>/images`, assigning ids
    /// in path order.
    pub fn scan<P: AsRef<Path>>(root: P, cache: CacheConfig, shards: usize) -> Result<Self> {
        let dataset = Self::new(root, cache, shards);
        let images_dir = dataset.root.join(IMAGES_DIR);
        if !images_dir.is_dir() {
            return Err(VocabTreeError::dataset(format!(
                "image directory {} does not exist",
                images_dir.display()
            )));
        }

        let mut next_id = 0u64;
        for entry in WalkDir::new(&images_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| VocabTreeError::dataset(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&images_dir)
                .map_err(|e| VocabTreeError::dataset(e.to_string()))?;
            let path = relative.to_string_lossy().replace('\\', "/");
            if dataset.add_image(Image::new(next_id, path)) {
                next_id += 1;
            }
        }

        log::info!(
            "Scanned {} images under {}",
            dataset.num_images(),
            images_dir.display()
        );
        Ok(dataset)
    }

    /// Load the id mapping from `mapping`.
    pub fn read<P: AsRef<Path>, M: AsRef<Path>>(
        root: P,
        mapping: M,
        cache: CacheConfig,
        shards: usize,
    ) -> Result<Self> {
        let dataset = Self::new(root, cache, shards);
        let mut reader = features::open_reader(mapping.as_ref())?;

        let count = reader.read_u64::<LittleEndian>()?;
        for _ in 0..count {
            let id = reader.read_u64::<LittleEndian>()?;
            let len = reader.read_u16::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            let path = String::from_utf8(bytes)
                .map_err(|e| VocabTreeError::corrupted(format!("image path is not UTF-8: {e}")))?;
            if !dataset.add_image(Image::new(id, path)) {
                return Err(VocabTreeError::corrupted(format!(
                    "duplicate image id {id} in dataset mapping"
                )));
            }
        }

        log::info!(
            "Read {} images from {}",
            dataset.num_images(),
            mapping.as_ref().display()
        );
        Ok(dataset)
    }

    /// Read `mapping` if it exists, otherwise scan the image directory and
    /// write the mapping for next time.
    pub fn open<P: AsRef<Path>, M: AsRef<Path>>(
        root: P,
        mapping: M,
        cache: CacheConfig,
        shards: usize,
    ) -> Result<Self> {
        if mapping.as_ref().exists() {
            return Self::read(root, mapping, cache, shards);
        }
        let dataset = Self::scan(root, cache, shards)?;
        dataset.write(mapping)?;
        Ok(dataset)
    }

    /// Write the id mapping to `mapping`, creating parent directories.
    pub fn write<M: AsRef<Path>>(&self, mapping: M) -> Result<()> {
        let table = self.table.read();
        let mut writer = features::create_writer(mapping.as_ref())?;

        writer.write_u64::<LittleEndian>(table.by_id.len() as u64)?;
        for image in table.by_id.values() {
            let bytes = image.path.as_bytes();
            let len = u16::try_from(bytes.len()).map_err(|_| {
                VocabTreeError::dataset(format!("image path too long: {}", image.path))
            })?;
            writer.write_u64::<LittleEndian>(image.id)?;
            writer.write_u16::<LittleEndian>(len)?;
            writer.write_all(bytes)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Add an image. Returns false if its id or path is already present.
    pub fn add_image(&self, image: Image) -> bool {
        self.table.write().insert(image)
    }

    /// Id of the image at `path` (relative to `images/`).
    pub fn id_of(&self, path: &str) -> Option<u64> {
        self.table.read().by_path.get(path).copied()
    }

    /// Dataset root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an image's descriptors to its feature file.
    pub fn store_descriptors(&self, id: u64, descriptors: &DescriptorMatrix) -> Result<()> {
        let path = self.require_feature_location(id, DESCRIPTORS)?;
        let mut writer = features::create_writer(&path)?;
        features::write_descriptors(&mut writer, descriptors)?;
        writer.flush()?;
        Ok(())
    }

    /// Bag-of-words cache, for inspecting hit rates.
    pub fn bow_cache(&self) -> &dyn LoadingCache<u64, Option<Arc<SparseVector>>> {
        self.bow_cache.as_ref()
    }

    /// Document vector cache, for inspecting hit rates.
    pub fn vec_cache(&self) -> &dyn LoadingCache<u64, Option<Arc<Vec<f32>>>> {
        self.vec_cache.as_ref()
    }

    fn require_feature_location(&self, id: u64, feature: &str) -> Result<PathBuf> {
        feature_location(&self.root, &self.table, id, feature)
            .ok_or_else(|| VocabTreeError::dataset(format!("unknown image id {id}")))
    }
}

fn feature_location(
    root: &Path,
    table: &RwLock<ImageTable>,
    id: u64,
    feature: &str,
) -> Option<PathBuf> {
    let table = table.read();
    let Some(image) = table.by_id.get(&id) else {
        log::warn!("Unknown image id {id}");
        return None;
    };
    Some(root.join(image.feature_path(feature)))
}

impl fmt::Debug for SimpleDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleDataset")
            .field("root", &self.root)
            .field("num_images", &self.num_images())
            .field("bow_cache", &self.bow_cache)
            .field("vec_cache", &self.vec_cache)
            .finish()
    }
}

impl Dataset for SimpleDataset {
    fn num_images(&self) -> usize {
        self.table.read().by_id.len()
    }

    fn image(&self, id: u64) -> Option<Image> {
        self.table.read().by_id.get(&id).cloned()
    }

    fn all_images(&self) -> Vec<Image> {
        self.table.read().by_id.values().cloned().collect()
    }

    fn location(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    fn load_descriptors(&self, image: &Image) -> Option<DescriptorMatrix> {
        let path = self.location(&image.feature_path(DESCRIPTORS));
        features::load_optional(&path, |r| features::read_descriptors(r))
    }

    fn load_bow_feature(&self, id: u64) -> Option<Arc<SparseVector>> {
        self.bow_cache.get(&id)
    }

    fn load_vec_feature(&self, id: u64) -> Option<Arc<Vec<f32>>> {
        self.vec_cache.get(&id)
    }

    fn store_bow_feature(&self, id: u64, vector: &[(u32, f32)]) -> Result<()> {
        let path = self.require_feature_location(id, BOW_DESCRIPTORS)?;
        let mut writer = features::create_writer(&path)?;
        features::write_sparse_vector(&mut writer, vector)?;
        writer.flush()?;
        self.bow_cache.invalidate(&id);
        Ok(())
    }

    fn store_vec_feature(&self, id: u64, vector: &[f32]) -> Result<()> {
        let path = self.require_feature_location(id, DATAVEC)?;
        let mut writer = features::create_writer(&path)?;
        features::write_data_vector(&mut writer, vector)?;
        writer.flush()?;
        self.vec_cache.invalidate(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStrategy;
    use std::fs;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(IMAGES_DIR).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"jpeg").unwrap();
    }

    fn cache() -> CacheConfig {
        CacheConfig {
            strategy: CacheStrategy::Ring,
            capacity: 16,
        }
    }

    #[test]
    fn test_scan_assigns_ids_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "sub/c.jpg");

        let dataset = SimpleDataset::scan(dir.path(), cache(), 2).unwrap();
        let paths: Vec<String> = dataset.all_images().into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["a.jpg", "b.jpg", "sub/c.jpg"]);
        assert_eq!(dataset.id_of("sub/c.jpg"), Some(2));
    }

    #[test]
    fn test_scan_without_images_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SimpleDataset::scan(dir.path(), cache(), 1).is_err());
    }

    #[test]
    fn test_mapping_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x.jpg");
        touch(dir.path(), "y.jpg");
        let mapping = dir.path().join("meta/dataset.map");

        let first = SimpleDataset::open(dir.path(), &mapping, cache(), 1).unwrap();
        assert!(mapping.exists());

        // new files are ignored once the mapping exists
        touch(dir.path(), "z.jpg");
        let second = SimpleDataset::open(dir.path(), &mapping, cache(), 1).unwrap();
        assert_eq!(second.all_images(), first.all_images());
    }

    #[test]
    fn test_feature_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = SimpleDataset::new(dir.path(), cache(), 2);
        assert!(dataset.add_image(Image::new(7, "img.jpg")));
        assert!(!dataset.add_image(Image::new(7, "other.jpg")));

        assert!(dataset.load_vec_feature(7).is_none());
        dataset.store_vec_feature(7, &[0.6, 0.8]).unwrap();
        assert_eq!(dataset.load_vec_feature(7).unwrap().as_slice(), &[0.6, 0.8]);
        assert_eq!(dataset.load_vec_feature(7).unwrap().as_slice(), &[0.6, 0.8]);
        assert_eq!(dataset.vec_cache().stats().hits, 1);

        dataset.store_bow_feature(7, &[(1, 2.0)]).unwrap();
        assert_eq!(dataset.load_bow_feature(7).unwrap().as_slice(), &[(1, 2.0)]);

        let descriptors = DescriptorMatrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        dataset.store_descriptors(7, &descriptors).unwrap();
        let image = dataset.image(7).unwrap();
        assert_eq!(dataset.load_descriptors(&image), Some(descriptors));

        assert!(dataset.load_bow_feature(99).is_none());
        assert!(dataset.store_vec_feature(99, &[1.0]).is_err());
    }
}
