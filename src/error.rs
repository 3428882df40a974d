//! Error types for the vocabtree library.
//!
//! All fallible operations return [`VocabTreeError`] through the crate-wide
//! [`Result`] alias. Conditions the engines recover from locally (a missing
//! feature file, a degenerate clustering input) are logged and never surface
//! as errors.
//!
//! ```
//! use vocabtree::error::{Result, VocabTreeError};
//!
//! fn check_split(split: u32) -> Result<()> {
//!     if split < 2 {
//!         return Err(VocabTreeError::invalid_config("split must be at least 2"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_split(1).is_err());
//! ```

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VocabTreeError {
    /// Failed reads and writes, including streams that end early.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An engine was used in a state that does not allow the operation.
    #[error("Index error: {0}")]
    Index(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Raised by a k-means implementation.
    #[error("Clustering error: {0}")]
    Clustering(String),

    /// Image enumeration or feature file problems.
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A persisted tree, index or codebook failed validation while loading.
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// A requested image or file does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The worker pool could not be started.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VocabTreeError>;

impl VocabTreeError {
    pub fn index<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::Index(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::Storage(msg.into())
    }

    pub fn clustering<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::Clustering(msg.into())
    }

    pub fn dataset<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::Dataset(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::InvalidConfig(msg.into())
    }

    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::Corrupted(msg.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        VocabTreeError::NotFound(what.into())
    }

    pub fn thread_pool<S: Into<String>>(msg: S) -> Self {
        VocabTreeError::ThreadPool(msg.into())
    }

    /// Whether a persisted structure ended before its declared contents.
    pub fn is_truncation(&self) -> bool {
        matches!(self, VocabTreeError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            VocabTreeError::invalid_config("split must be at least 2").to_string(),
            "Invalid configuration: split must be at least 2"
        );
        assert_eq!(
            VocabTreeError::not_found("image 7").to_string(),
            "Not found: image 7"
        );
        assert_eq!(
            VocabTreeError::corrupted("checksum mismatch").to_string(),
            "Corrupted data: checksum mismatch"
        );
    }

    #[test]
    fn test_truncation() {
        let error = VocabTreeError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
        assert!(error.is_truncation());
        assert!(!VocabTreeError::index("untrained").is_truncation());
    }
}
