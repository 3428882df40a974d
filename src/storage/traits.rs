//! Storage backend traits.

use std::fmt::Debug;
use std::io::{Read, Write};

use crate::error::{Result, VocabTreeError};

/// Where persisted trees, indexes and codebooks are kept.
///
/// Files are addressed by flat names such as `tree.10.6.bin`. A file written
/// through [`Storage::create_output`] only becomes visible under its name
/// once the output is committed, so a reader never sees a partial index and
/// a failed save leaves any previous file untouched.
pub trait Storage: Send + Sync + Debug {
    /// Open a committed file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Start writing `name`. Nothing is visible until [`StorageOutput::commit`].
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Whether a committed file named `name` exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Size of a committed file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Remove a file. Removing a missing file is not an error.
    fn remove_file(&self, name: &str) -> Result<()>;
}

/// A readable file of known length.
pub trait StorageInput: Read + Send + Debug {
    /// Total length in bytes.
    fn size(&self) -> u64;
}

/// A pending file. Dropping it without committing discards what was written.
pub trait StorageOutput: Write + Send + Debug {
    /// Flush and publish the file under its final name, replacing any
    /// previous version.
    fn commit(&mut self) -> Result<()>;
}

/// Tuning for [`crate::storage::FileStorage`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Read and write buffer size in bytes.
    pub buffer_size: usize,
    /// fsync a file before publishing it.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            buffer_size: 64 * 1024,
            sync_writes: false,
        }
    }
}

pub(crate) fn not_found(name: &str) -> VocabTreeError {
    VocabTreeError::storage(format!("file not found: {name}"))
}
