//! Structured binary I/O for persisted indexes.
//!
//! Both engines serialize themselves as a flat little-endian record stream
//! followed by a CRC32 footer covering every preceding byte. The reader
//! hashes as it goes, so [`StructReader::verify_footer`] detects corruption
//! anywhere in the stream, and length prefixes are checked against the bytes
//! actually left in the input before anything is allocated.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, VocabTreeError};
use crate::storage::{StorageInput, StorageOutput};

/// Size of the CRC32 footer in bytes.
pub const FOOTER_SIZE: u64 = 4;

/// A structured writer for binary data.
pub struct StructWriter {
    writer: Box<dyn StorageOutput>,
    hasher: Hasher,
    position: u64,
}

impl StructWriter {
    /// Create a new structured writer.
    pub fn new(writer: Box<dyn StorageOutput>) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write an i32 value (little-endian).
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer.write_i32::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write a slice of f32 values without a length prefix.
    pub fn write_f32_slice(&mut self, values: &[f32]) -> Result<()> {
        let mut bytes = vec![0u8; values.len() * 4];
        LittleEndian::write_f32_into(values, &mut bytes);
        self.write_raw(&bytes)
    }

    /// Write a slice of u64 values without a length prefix.
    pub fn write_u64_slice(&mut self, values: &[u64]) -> Result<()> {
        let mut bytes = vec![0u8; values.len() * 8];
        LittleEndian::write_u64_into(values, &mut bytes);
        self.write_raw(&bytes)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.update(value);
        Ok(())
    }

    /// Number of payload bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the checksum footer and commit the output.
    pub fn finish(mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.commit()
    }
}

/// A structured reader for binary data written by [`StructWriter`].
pub struct StructReader {
    reader: Box<dyn StorageInput>,
    hasher: Hasher,
    position: u64,
    payload_size: u64,
}

impl StructReader {
    /// Create a new structured reader. Fails if the input is too small to hold a footer.
    pub fn new(reader: Box<dyn StorageInput>) -> Result<Self> {
        let file_size = reader.size();
        if file_size < FOOTER_SIZE {
            return Err(VocabTreeError::corrupted(format!(
                "input of {file_size} bytes is too small to hold a checksum footer"
            )));
        }

        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            payload_size: file_size - FOOTER_SIZE,
        })
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_remaining(4)?;
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an i32 value (little-endian).
    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        let value = self.reader.read_i32::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure_remaining(8)?;
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read `len` f32 values.
    pub fn read_f32_vec(&mut self, len: usize) -> Result<Vec<f32>> {
        let bytes = self.read_raw(len.checked_mul(4).ok_or_else(Self::overflow)?)?;
        let mut values = vec![0f32; len];
        LittleEndian::read_f32_into(&bytes, &mut values);
        Ok(values)
    }

    /// Read `len` u64 values.
    pub fn read_u64_vec(&mut self, len: usize) -> Result<Vec<u64>> {
        let bytes = self.read_raw(len.checked_mul(8).ok_or_else(Self::overflow)?)?;
        let mut values = vec![0u64; len];
        LittleEndian::read_u64_into(&bytes, &mut values);
        Ok(values)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(length as u64)?;
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.update(&bytes);
        Ok(bytes)
    }

    /// Payload bytes not yet consumed.
    pub fn remaining(&self) -> u64 {
        self.payload_size.saturating_sub(self.position)
    }

    /// Fail unless at least `bytes` payload bytes remain.
    pub fn ensure_remaining(&self, bytes: u64) -> Result<()> {
        if bytes > self.remaining() {
            return Err(VocabTreeError::corrupted(format!(
                "record of {bytes} bytes at offset {} overruns the {} byte payload",
                self.position, self.payload_size
            )));
        }
        Ok(())
    }

    /// Check that the payload was consumed exactly and matches the footer checksum.
    pub fn verify_footer(mut self) -> Result<()> {
        if self.position != self.payload_size {
            return Err(VocabTreeError::corrupted(format!(
                "{} trailing payload bytes",
                self.payload_size - self.position
            )));
        }

        let stored = self.reader.read_u32::<LittleEndian>()?;
        let computed = self.hasher.clone().finalize();
        if stored != computed {
            return Err(VocabTreeError::corrupted(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(())
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    fn overflow() -> VocabTreeError {
        VocabTreeError::corrupted("record length overflows usize")
    }
}
