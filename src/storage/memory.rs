//! In-memory storage for tests and throwaway indexes.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::traits::{Storage, StorageInput, StorageOutput, not_found};

type Files = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// Keeps committed files in a shared map. Clones share the same files.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: Files,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed files.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Overwrite a file's bytes directly.
    pub fn put_bytes(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), data.into());
    }

    /// Copy of a file's bytes.
    pub fn bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.to_vec())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let data = self.files.lock().get(name).cloned().ok_or_else(|| not_found(name))?;
        Ok(Box::new(MemoryInput(Cursor::new(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Some(Vec::new()),
            files: Arc::clone(&self.files),
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.lock();
        let data = files.get(name).ok_or_else(|| not_found(name))?;
        Ok(data.len() as u64)
    }

    fn remove_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryInput(Cursor<Arc<[u8]>>);

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> u64 {
        self.0.get_ref().len() as u64
    }
}

#[derive(Debug)]
struct MemoryOutput {
    name: String,
    /// `None` once committed.
    buffer: Option<Vec<u8>>,
    files: Files,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.write(buf),
            None => Err(io::Error::other("output already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn commit(&mut self) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            self.files.lock().insert(self.name.clone(), buffer.into());
        }
        Ok(())
    }
}
