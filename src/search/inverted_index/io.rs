//! Binary persistence of an inverted index.
//!
//! `words u32 | idf f32[words] | (count u64, ids u64[count])[words]`,
//! little-endian, followed by the CRC32 footer.

use super::InvertedIndex;
use crate::error::{Result, VocabTreeError};
use crate::storage::{Storage, StructReader, StructWriter};

impl InvertedIndex {
    /// Write the trained index to `name`.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        if !self.is_trained() {
            return Err(VocabTreeError::index("cannot save an untrained inverted index"));
        }
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(self.idf.len() as u32)?;
        writer.write_f32_slice(&self.idf)?;
        for list in &self.postings {
            writer.write_u64(list.len() as u64)?;
            writer.write_u64_slice(list)?;
        }
        writer.finish()?;
        log::info!("Saved inverted index over {} words to {name}", self.idf.len());
        Ok(())
    }

    /// Replace this index with the one stored at `name`, keeping the search
    /// parameters. On failure the index is left empty.
    pub fn load(&mut self, storage: &dyn Storage, name: &str) -> Result<()> {
        match Self::read(storage, name) {
            Ok((idf, postings)) => {
                self.idf = idf;
                self.postings = postings;
                log::info!("Loaded inverted index over {} words from {name}", self.idf.len());
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    fn read(storage: &dyn Storage, name: &str) -> Result<(Vec<f32>, Vec<Vec<u64>>)> {
        let mut reader = StructReader::new(storage.open_input(name)?)?;
        let words = reader.read_u32()? as usize;
        if words == 0 {
            return Err(VocabTreeError::corrupted("inverted index has no words"));
        }
        let idf = reader.read_f32_vec(words)?;

        reader.ensure_remaining(words as u64 * 8)?;
        let mut postings = Vec::with_capacity(words);
        for word in 0..words {
            let count = reader.read_u64()?;
            reader.ensure_remaining(count.saturating_mul(8))?;
            let list = reader.read_u64_vec(count as usize)?;
            if !list.is_sorted_by(|a, b| a < b) {
                return Err(VocabTreeError::corrupted(format!(
                    "postings of word {word} are not strictly ascending"
                )));
            }
            postings.push(list);
        }
        reader.verify_footer()?;
        Ok((idf, postings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::inverted_index::InvertedIndexParams;
    use crate::storage::MemoryStorage;

    fn trained() -> InvertedIndex {
        let mut index = InvertedIndex::new(InvertedIndexParams { cutoff: 2 });
        index
            .train_from_vectors(
                5,
                vec![
                    (3, vec![(0, 1.0), (4, 2.0)]),
                    (1, vec![(4, 1.0)]),
                    (8, vec![(2, 1.0), (4, 1.0)]),
                ],
            )
            .unwrap();
        index
    }

    #[test]
    fn test_round_trip() {
        let storage = MemoryStorage::new();
        let index = trained();
        index.save(&storage, "index.bin").unwrap();

        let mut loaded = InvertedIndex::new(InvertedIndexParams { cutoff: 2 });
        loaded.load(&storage, "index.bin").unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.postings(4), &[1, 3, 8]);
    }

    #[test]
    fn test_corrupted_file_clears_index() {
        let storage = MemoryStorage::new();
        trained().save(&storage, "index.bin").unwrap();
        let mut bytes = storage.bytes("index.bin").unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0x01;
        storage.put_bytes("bad.bin", bytes);

        let mut index = trained();
        assert!(index.load(&storage, "bad.bin").is_err());
        assert!(!index.is_trained());
        assert_eq!(index.num_clusters(), 0);
    }

    #[test]
    fn test_untrained_index_is_not_saved() {
        let storage = MemoryStorage::new();
        assert!(InvertedIndex::default().save(&storage, "index.bin").is_err());
        assert!(!storage.file_exists("index.bin"));
    }
}
