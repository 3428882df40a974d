//! On-disk feature file formats.
//!
//! All formats are little-endian:
//!
//! - descriptors: `elem_size:u64, elem_type:u64, rows:u32, cols:u32`, then
//!   `rows * cols` elements. Element type 0 is `u8`, type 5 is `f32`.
//! - bag-of-words: `count:u32`, then `count` pairs of `(word:u32, weight:f32)`.
//! - data vectors: raw `f32` values, length implied by the file size.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::descriptor::DescriptorMatrix;
use crate::error::{Result, VocabTreeError};
use crate::numerics::{SparseVector, canonicalize, is_canonical};

/// Feature name of local descriptor files.
pub const DESCRIPTORS: &str = "descriptors";
/// Feature name of bag-of-words files.
pub const BOW_DESCRIPTORS: &str = "bow_descriptors";
/// Feature name of tree document vector files.
pub const DATAVEC: &str = "datavec";

/// Element type codes in descriptor headers.
pub const ELEM_TYPE_U8: u64 = 0;
pub const ELEM_TYPE_F32: u64 = 5;

/// Read a descriptor matrix.
pub fn read_descriptors<R: Read>(reader: &mut R) -> Result<DescriptorMatrix> {
    let elem_size = reader.read_u64::<LittleEndian>()?;
    let elem_type = reader.read_u64::<LittleEndian>()?;
    let rows = reader.read_u32::<LittleEndian>()? as usize;
    let cols = reader.read_u32::<LittleEndian>()? as usize;
    let len = rows
        .checked_mul(cols)
        .ok_or_else(|| VocabTreeError::corrupted("descriptor matrix size overflows"))?;

    let element_bytes = match (elem_type, elem_size) {
        (ELEM_TYPE_U8, 1) => 1,
        (ELEM_TYPE_F32, 4) => 4,
        _ => {
            return Err(VocabTreeError::dataset(format!(
                "unsupported descriptor element type {elem_type} of size {elem_size}"
            )));
        }
    };
    let expected = len
        .checked_mul(element_bytes)
        .ok_or_else(|| VocabTreeError::corrupted("descriptor matrix size overflows"))?;

    // the header is untrusted; read at most what it claims, then check
    let mut bytes = Vec::new();
    reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
    if bytes.len() != expected {
        return Err(VocabTreeError::corrupted(format!(
            "descriptor header claims {rows}x{cols} elements but only {} of {expected} bytes follow",
            bytes.len()
        )));
    }

    let data = if element_bytes == 1 {
        bytes.into_iter().map(f32::from).collect()
    } else {
        let mut values = vec![0f32; len];
        LittleEndian::read_f32_into(&bytes, &mut values);
        values
    };

    if rows == 0 {
        return Ok(DescriptorMatrix::new(cols));
    }
    DescriptorMatrix::from_flat(cols, data)
}

/// Write a descriptor matrix as `f32` elements.
pub fn write_descriptors<W: Write>(writer: &mut W, descriptors: &DescriptorMatrix) -> Result<()> {
    writer.write_u64::<LittleEndian>(4)?;
    writer.write_u64::<LittleEndian>(ELEM_TYPE_F32)?;
    writer.write_u32::<LittleEndian>(descriptors.rows() as u32)?;
    writer.write_u32::<LittleEndian>(descriptors.dimension() as u32)?;
    for value in descriptors.as_slice() {
        writer.write_f32::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Read a bag-of-words vector. Unsorted input is canonicalized.
pub fn read_sparse_vector<R: Read>(reader: &mut R) -> Result<SparseVector> {
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut vector = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let word = reader.read_u32::<LittleEndian>()?;
        let weight = reader.read_f32::<LittleEndian>()?;
        vector.push((word, weight));
    }
    if !is_canonical(&vector) {
        canonicalize(&mut vector);
    }
    Ok(vector)
}

/// Write a bag-of-words vector.
pub fn write_sparse_vector<W: Write>(writer: &mut W, vector: &[(u32, f32)]) -> Result<()> {
    writer.write_u32::<LittleEndian>(vector.len() as u32)?;
    for &(word, weight) in vector {
        writer.write_u32::<LittleEndian>(word)?;
        writer.write_f32::<LittleEndian>(weight)?;
    }
    Ok(())
}

/// Read a raw `f32` vector until end of input.
pub fn read_data_vector<R: Read>(reader: &mut R) -> Result<Vec<f32>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(VocabTreeError::corrupted(format!(
            "data vector of {} bytes is not a whole number of floats",
            bytes.len()
        )));
    }
    let mut values = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(&bytes, &mut values);
    Ok(values)
}

/// Write a raw `f32` vector.
pub fn write_data_vector<W: Write>(writer: &mut W, values: &[f32]) -> Result<()> {
    for value in values {
        writer.write_f32::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Open `path` for buffered reading.
pub fn open_reader(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Create `path` for buffered writing, creating parent directories as needed.
pub fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Load a feature file with `read`, logging and swallowing any failure.
pub fn load_optional<T>(path: &Path, read: impl FnOnce(&mut BufReader<File>) -> Result<T>) -> Option<T> {
    if !path.exists() {
        log::debug!("Feature file {} does not exist", path.display());
        return None;
    }
    match open_reader(path).and_then(|mut reader| read(&mut reader)) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Failed to read feature file {}: {e}", path.display());
            None
        }
    }
}
