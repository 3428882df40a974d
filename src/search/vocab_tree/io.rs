//! Binary persistence of a trained tree.
//!
//! Layout, all little-endian, followed by the CRC32 footer:
//!
//! ```text
//! split u32 | depth u32 | nodes u32 | weights f32[nodes]
//! images u32 | (id u64, vector f32[nodes])*        ascending id
//! leaves u32 | (size u32, (id u64, tf u32)[size])*  ascending id per leaf
//! per node: first_child u32 | index u32 | inverted_file_length u32
//!           | level u32 | level_index u32
//!           | elem_size u64 | elem_type i32 | rows u32 | cols u32 | f32[rows*cols]
//! ```

use std::sync::Arc;

use ahash::AHashMap;

use super::node::{self, TreeNode};
use super::{TreeParams, VocabTree};
use crate::dataset::features::ELEM_TYPE_F32;
use crate::error::{Result, VocabTreeError};
use crate::storage::{Storage, StructReader, StructWriter};

const MEAN_ELEM_SIZE: u64 = 4;
const MEAN_ELEM_TYPE: i32 = ELEM_TYPE_F32 as i32;
const NODE_FIXED_BYTES: u64 = 5 * 4 + 8 + 4 + 4 + 4;

impl VocabTree {
    /// Write the trained tree to `name`.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        if !self.is_trained() {
            return Err(VocabTreeError::index("cannot save an untrained vocabulary tree"));
        }
        let mut writer = StructWriter::new(storage.create_output(name)?);
        self.write_to(&mut writer)?;
        writer.finish()?;
        log::info!(
            "Saved vocabulary tree with {} nodes and {} images to {name}",
            self.nodes.len(),
            self.vectors.len()
        );
        Ok(())
    }

    /// Replace this tree with the one stored at `name`. On failure the tree
    /// is left empty.
    pub fn load(&mut self, storage: &dyn Storage, name: &str) -> Result<()> {
        let result = storage
            .open_input(name)
            .and_then(StructReader::new)
            .and_then(|mut reader| {
                let loaded = self.read_from(&mut reader)?;
                reader.verify_footer()?;
                Ok(loaded)
            });

        match result {
            Ok(loaded) => {
                *self = loaded;
                log::info!(
                    "Loaded vocabulary tree (split {}, depth {}) with {} images from {name}",
                    self.params.split,
                    self.params.depth,
                    self.vectors.len()
                );
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    fn write_to(&self, writer: &mut StructWriter) -> Result<()> {
        writer.write_u32(self.params.split)?;
        writer.write_u32(self.params.depth)?;
        writer.write_u32(self.nodes.len() as u32)?;
        writer.write_f32_slice(&self.weights)?;

        writer.write_u32(self.vectors.len() as u32)?;
        let mut images: Vec<(u64, &[f32])> = self
            .vectors
            .iter()
            .map(|(&id, vector)| (id, vector.as_slice()))
            .collect();
        images.sort_unstable_by_key(|&(id, _)| id);
        for (id, vector) in images {
            writer.write_u64(id)?;
            writer.write_f32_slice(vector)?;
        }

        writer.write_u32(self.postings.len() as u32)?;
        for postings in &self.postings {
            let mut entries: Vec<(u64, u32)> = postings.iter().map(|(&id, &tf)| (id, tf)).collect();
            entries.sort_unstable();
            writer.write_u32(entries.len() as u32)?;
            for (id, tf) in entries {
                writer.write_u64(id)?;
                writer.write_u32(tf)?;
            }
        }

        for node in &self.nodes {
            writer.write_u32(node.first_child_index)?;
            writer.write_u32(node.index)?;
            writer.write_u32(node.inverted_file_length)?;
            writer.write_u32(node.level)?;
            writer.write_u32(node.level_index)?;
            writer.write_u64(MEAN_ELEM_SIZE)?;
            writer.write_i32(MEAN_ELEM_TYPE)?;
            writer.write_u32(u32::from(node.has_mean()))?;
            writer.write_u32(node.mean.len() as u32)?;
            writer.write_f32_slice(&node.mean)?;
        }
        Ok(())
    }

    fn read_from(&self, reader: &mut StructReader) -> Result<VocabTree> {
        let split = reader.read_u32()?;
        let depth = reader.read_u32()?;
        let params = TreeParams {
            split,
            depth,
            ..self.params
        };
        let expected = params
            .validate()
            .map_err(|err| VocabTreeError::corrupted(format!("invalid tree header: {err}")))?;

        let total = reader.read_u32()?;
        if total != expected {
            return Err(VocabTreeError::corrupted(format!(
                "header declares {total} nodes, split {split} and depth {depth} give {expected}"
            )));
        }
        let total = total as usize;
        let weights = reader.read_f32_vec(total)?;

        let image_count = reader.read_u32()?;
        reader.ensure_remaining(u64::from(image_count).saturating_mul(8 + 4 * total as u64))?;
        let mut vectors = AHashMap::with_capacity(image_count as usize);
        for _ in 0..image_count {
            let id = reader.read_u64()?;
            let vector = reader.read_f32_vec(total)?;
            if vectors.insert(id, Arc::new(vector)).is_some() {
                return Err(VocabTreeError::corrupted(format!("image {id} stored twice")));
            }
        }

        let leaves = reader.read_u32()?;
        let expected_leaves = node::leaf_count(split, depth).unwrap_or(0);
        if leaves != expected_leaves {
            return Err(VocabTreeError::corrupted(format!(
                "expected {expected_leaves} inverted files, found {leaves}"
            )));
        }
        reader.ensure_remaining(u64::from(leaves) * 4)?;
        let mut postings = Vec::with_capacity(leaves as usize);
        for _ in 0..leaves {
            let size = reader.read_u32()?;
            reader.ensure_remaining(u64::from(size) * 12)?;
            let mut entries = AHashMap::with_capacity(size as usize);
            for _ in 0..size {
                let id = reader.read_u64()?;
                let tf = reader.read_u32()?;
                entries.insert(id, tf);
            }
            postings.push(entries);
        }

        reader.ensure_remaining(total as u64 * NODE_FIXED_BYTES)?;
        let mut nodes = Vec::with_capacity(total);
        for position in 0..total {
            nodes.push(read_node(reader, position)?);
        }

        let loaded = VocabTree {
            params,
            nodes,
            weights,
            postings,
            vectors,
            kmeans: Arc::clone(&self.kmeans),
        };
        loaded.validate_structure()?;
        Ok(loaded)
    }
}

fn read_node(reader: &mut StructReader, position: usize) -> Result<TreeNode> {
    let first_child_index = reader.read_u32()?;
    let index = reader.read_u32()?;
    let inverted_file_length = reader.read_u32()?;
    let level = reader.read_u32()?;
    let level_index = reader.read_u32()?;

    let elem_size = reader.read_u64()?;
    let elem_type = reader.read_i32()?;
    let rows = reader.read_u32()?;
    let cols = reader.read_u32()?;
    if elem_size != MEAN_ELEM_SIZE || elem_type != MEAN_ELEM_TYPE || rows > 1 {
        return Err(VocabTreeError::corrupted(format!(
            "node {position} has an unsupported mean ({rows}x{cols}, type {elem_type}, size {elem_size})"
        )));
    }
    let len = if rows == 0 { 0 } else { cols as usize };
    let mean = reader.read_f32_vec(len)?;

    Ok(TreeNode {
        index,
        level,
        level_index,
        first_child_index,
        inverted_file_length,
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DescriptorMatrix;
    use crate::storage::MemoryStorage;

    fn trained() -> VocabTree {
        let mut tree = VocabTree::new(TreeParams::new(2, 3)).unwrap();
        let rows = [[1.0, 0.0], [0.9, 0.3], [0.0, 1.0], [0.2, 0.8], [0.7, 0.7]];
        tree.build_structure(&DescriptorMatrix::from_rows(&rows).unwrap())
            .unwrap();
        let images: Vec<(u64, DescriptorMatrix)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i as u64 * 10, DescriptorMatrix::from_rows(&[*row]).unwrap()))
            .collect();
        tree.index_images(&images).unwrap();
        tree
    }

    #[test]
    fn test_round_trip() {
        let storage = MemoryStorage::new();
        let tree = trained();
        tree.save(&storage, "tree.bin").unwrap();

        let mut loaded = VocabTree::default();
        loaded.load(&storage, "tree.bin").unwrap();
        assert_eq!(loaded.split(), 2);
        assert_eq!(loaded.depth(), 3);
        assert_eq!(loaded.nodes(), tree.nodes());
        assert_eq!(loaded.weights(), tree.weights());
        assert_eq!(loaded.image_ids(), tree.image_ids());
        for id in tree.image_ids() {
            assert_eq!(loaded.document_vector(id), tree.document_vector(id));
        }
        for leaf in 0..tree.num_leaves() {
            assert_eq!(loaded.leaf_postings(leaf), tree.leaf_postings(leaf));
        }

        // Saving is deterministic.
        loaded.save(&storage, "again.bin").unwrap();
        assert_eq!(storage.bytes("tree.bin"), storage.bytes("again.bin"));
    }

    #[test]
    fn test_untrained_tree_is_not_saved() {
        let storage = MemoryStorage::new();
        assert!(VocabTree::default().save(&storage, "tree.bin").is_err());
    }

    #[test]
    fn test_corruption_resets_tree() {
        let storage = MemoryStorage::new();
        trained().save(&storage, "tree.bin").unwrap();
        let mut bytes = storage.bytes("tree.bin").unwrap();

        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        storage.put_bytes("flipped.bin", bytes.clone());
        let mut tree = trained();
        assert!(tree.load(&storage, "flipped.bin").is_err());
        assert!(!tree.is_trained());
        assert_eq!(tree.number_of_nodes(), 0);

        bytes.truncate(middle);
        storage.put_bytes("short.bin", bytes);
        assert!(tree.load(&storage, "short.bin").is_err());
        assert!(tree.load(&storage, "missing.bin").is_err());
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let storage = MemoryStorage::new();
        let mut writer = StructWriter::new(storage.create_output("bad.bin").unwrap());
        writer.write_u32(2).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u32(7).unwrap();
        writer.finish().unwrap();

        let mut tree = VocabTree::default();
        let err = tree.load(&storage, "bad.bin").unwrap_err();
        assert!(matches!(err, VocabTreeError::Corrupted(_)));
    }
}
