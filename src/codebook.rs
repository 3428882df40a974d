//! Visual-word codebooks.
//!
//! A codebook maps a descriptor to the id of its nearest visual word. The
//! inverted index scores images by their bag-of-words histograms over this
//! word space.

use std::fmt::Debug;

use rayon::prelude::*;

use crate::clustering::{KMeans, nearest};
use crate::dataset::{Dataset, Image};
use crate::descriptor::DescriptorMatrix;
use crate::error::{Result, VocabTreeError};
use crate::numerics::{SparseVector, canonicalize};
use crate::storage::{Storage, StructReader, StructWriter};

/// A trained vocabulary of visual words.
pub trait Codebook: Send + Sync + Debug {
    /// Number of visual words.
    fn num_words(&self) -> usize;

    /// Descriptor dimension the words were trained on.
    fn dimension(&self) -> usize;

    /// Word id of the word closest to `descriptor`.
    fn assign(&self, descriptor: &[f32]) -> u32;

    /// Term-frequency histogram of a descriptor set, ascending by word id.
    fn quantize(&self, descriptors: &DescriptorMatrix) -> SparseVector {
        let mut histogram: SparseVector = descriptors
            .iter_rows()
            .map(|row| (self.assign(row), 1.0))
            .collect();
        canonicalize(&mut histogram);
        histogram
    }
}

/// A codebook stored as a flat `K x D` centroid matrix searched exhaustively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatCodebook {
    centroids: Vec<Vec<f32>>,
    dimension: usize,
}

impl FlatCodebook {
    /// Wrap an existing centroid matrix.
    pub fn from_centroids(centroids: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = centroids.first().map(Vec::len).unwrap_or(0);
        if centroids.iter().any(|c| c.len() != dimension) {
            return Err(VocabTreeError::invalid_config(
                "codebook centroids must share one dimension",
            ));
        }
        Ok(FlatCodebook {
            centroids,
            dimension,
        })
    }

    /// Cluster `samples` into `num_words` visual words.
    pub fn train(samples: &DescriptorMatrix, num_words: usize, kmeans: &dyn KMeans) -> Result<Self> {
        log::info!(
            "Training codebook of {num_words} words from {} descriptors",
            samples.rows()
        );
        let clustering = kmeans.cluster(samples, num_words)?;
        Self::from_centroids(clustering.centroids)
    }

    /// The centroid of every word.
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Quantize many descriptor sets in parallel.
    pub fn quantize_batch(&self, sets: &[DescriptorMatrix]) -> Vec<SparseVector> {
        sets.par_iter().map(|set| self.quantize(set)).collect()
    }

    /// Persist as `num_words:u32, dimension:u32, f32[num_words * dimension]`.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(self.centroids.len() as u32)?;
        writer.write_u32(self.dimension as u32)?;
        for centroid in &self.centroids {
            writer.write_f32_slice(centroid)?;
        }
        writer.finish()
    }

    /// Load a codebook written by [`FlatCodebook::save`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?)?;
        let num_words = reader.read_u32()? as usize;
        let dimension = reader.read_u32()? as usize;

        let row_bytes = (dimension as u64) * 4;
        reader.ensure_remaining(row_bytes.saturating_mul(num_words as u64))?;

        let mut centroids = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            centroids.push(reader.read_f32_vec(dimension)?);
        }
        reader.verify_footer()?;

        Ok(FlatCodebook {
            centroids,
            dimension,
        })
    }
}

impl Codebook for FlatCodebook {
    fn num_words(&self) -> usize {
        self.centroids.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn assign(&self, descriptor: &[f32]) -> u32 {
        nearest(descriptor, &self.centroids) as u32
    }
}

/// Quantize the descriptors of `images` and store each histogram as the
/// image's bag-of-words feature. Returns the number of images encoded;
/// images without descriptors of the codebook's dimension are skipped.
pub fn encode_images(codebook: &dyn Codebook, dataset: &dyn Dataset, images: &[Image]) -> Result<usize> {
    let encoded = images
        .par_iter()
        .map(|image| {
            let Some(descriptors) = dataset.load_descriptors(image) else {
                return Ok(false);
            };
            if descriptors.dimension() != codebook.dimension() {
                log::warn!(
                    "Skipping image {}: descriptor dimension {} does not match the codebook",
                    image.id,
                    descriptors.dimension()
                );
                return Ok(false);
            }
            dataset.store_bow_feature(image.id, &codebook.quantize(&descriptors))?;
            Ok(true)
        })
        .collect::<Result<Vec<bool>>>()?;

    let count = encoded.into_iter().filter(|&done| done).count();
    log::info!("Encoded {count} of {} images", images.len());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::LloydKMeans;
    use crate::dataset::MemoryDataset;
    use crate::storage::MemoryStorage;

    fn codebook() -> FlatCodebook {
        FlatCodebook::from_centroids(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap()
    }

    #[test]
    fn test_assign_and_quantize() {
        let cb = codebook();
        assert_eq!(cb.num_words(), 3);
        assert_eq!(cb.dimension(), 2);
        assert_eq!(cb.assign(&[0.9, 0.1]), 1);

        let descriptors =
            DescriptorMatrix::from_rows(&[vec![0.0, 0.9], vec![1.0, 0.1], vec![0.1, 1.0]]).unwrap();
        assert_eq!(cb.quantize(&descriptors), vec![(1, 1.0), (2, 2.0)]);
    }

    #[test]
    fn test_train() {
        let samples = DescriptorMatrix::from_rows(&[
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
        ])
        .unwrap();
        let cb = FlatCodebook::train(&samples, 2, &LloydKMeans::with_seed(11)).unwrap();
        assert_eq!(cb.num_words(), 2);
        assert_ne!(cb.assign(&[0.0, 0.0]), cb.assign(&[5.0, 5.0]));
    }

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        let cb = codebook();
        cb.save(&storage, "words.bin").unwrap();
        assert_eq!(FlatCodebook::load(&storage, "words.bin").unwrap(), cb);
    }

    #[test]
    fn test_encode_images() {
        let dataset = MemoryDataset::new();
        let a = dataset.add_image("a.jpg");
        let b = dataset.add_image("b.jpg");
        dataset.add_image("c.jpg");
        dataset.set_descriptors(a, DescriptorMatrix::from_rows(&[[0.9, 0.0], [0.0, 0.8]]).unwrap());
        dataset.set_descriptors(b, DescriptorMatrix::from_rows(&[[1.0, 1.0, 1.0]]).unwrap());

        let encoded = encode_images(&codebook(), &dataset, &dataset.all_images()).unwrap();
        assert_eq!(encoded, 1);
        assert_eq!(
            dataset.load_bow_feature(a).as_deref(),
            Some(&vec![(1, 1.0), (2, 1.0)])
        );
        assert!(dataset.load_bow_feature(b).is_none());
    }

    #[test]
    fn test_mismatched_centroids() {
        assert!(FlatCodebook::from_centroids(vec![vec![0.0], vec![0.0, 1.0]]).is_err());
    }
}
