//! Directory-backed storage.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, VocabTreeError};
use crate::storage::traits::{Storage, StorageConfig, StorageInput, StorageOutput, not_found};

/// Suffix of files still being written.
const PENDING_SUFFIX: &str = ".pending";

/// Stores every file directly under one directory.
///
/// Outputs are written to `<name>.pending` and renamed over `<name>` on
/// commit; the rename is atomic on the same filesystem.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    config: StorageConfig,
}

impl FileStorage {
    /// Open `directory`, creating it if needed.
    pub fn new<P: AsRef<Path>>(directory: P, config: StorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            VocabTreeError::storage(format!("cannot create {}: {e}", directory.display()))
        })?;
        if !directory.is_dir() {
            return Err(VocabTreeError::storage(format!(
                "{} is not a directory",
                directory.display()
            )));
        }
        Ok(FileStorage { directory, config })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

fn open_error(name: &str, e: io::Error) -> VocabTreeError {
    if e.kind() == io::ErrorKind::NotFound {
        not_found(name)
    } else {
        VocabTreeError::storage(format!("cannot open {name}: {e}"))
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let file = File::open(self.path_of(name)).map_err(|e| open_error(name, e))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileInput {
            reader: BufReader::with_capacity(self.config.buffer_size, file),
            size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let target = self.path_of(name);
        let mut pending = target.clone().into_os_string();
        pending.push(PENDING_SUFFIX);
        let pending = PathBuf::from(pending);

        let file = File::create(&pending).map_err(|e| {
            VocabTreeError::storage(format!("cannot create {}: {e}", pending.display()))
        })?;
        Ok(Box::new(FileOutput {
            writer: Some(BufWriter::with_capacity(self.config.buffer_size, file)),
            pending,
            target,
            sync: self.config.sync_writes,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let metadata = self.path_of(name).metadata().map_err(|e| open_error(name, e))?;
        Ok(metadata.len())
    }

    fn remove_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_of(name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(VocabTreeError::storage(format!("cannot remove {name}: {e}")))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct FileInput {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
struct FileOutput {
    /// `None` once committed.
    writer: Option<BufWriter<File>>,
    pending: PathBuf,
    target: PathBuf,
    sync: bool,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("output already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.as_mut().map_or(Ok(()), |writer| writer.flush())
    }
}

impl StorageOutput for FileOutput {
    fn commit(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| VocabTreeError::storage(format!("flush failed: {}", e.error())))?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&self.pending, &self.target).map_err(|e| {
            VocabTreeError::storage(format!("cannot publish {}: {e}", self.target.display()))
        })?;
        log::debug!("Wrote {}", self.target.display());
        Ok(())
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        // after a successful commit the pending file is already gone
        drop(self.writer.take());
        let _ = fs::remove_file(&self.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("indexes"), StorageConfig::default()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_commit_publishes() {
        let (_dir, storage) = storage();
        let mut output = storage.create_output("tree.bin").unwrap();
        output.write_all(b"vocab").unwrap();
        assert!(!storage.file_exists("tree.bin"));
        output.commit().unwrap();

        assert_eq!(storage.file_size("tree.bin").unwrap(), 5);
        let mut input = storage.open_input("tree.bin").unwrap();
        assert_eq!(input.size(), 5);
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"vocab");
    }

    #[test]
    fn test_abandoned_output_keeps_previous_file() {
        let (_dir, storage) = storage();
        let mut output = storage.create_output("index.bin").unwrap();
        output.write_all(&[1, 2, 3]).unwrap();
        output.commit().unwrap();

        let mut output = storage.create_output("index.bin").unwrap();
        output.write_all(&[9; 100]).unwrap();
        drop(output);

        assert_eq!(storage.file_size("index.bin").unwrap(), 3);
        assert!(!storage.directory().join("index.bin.pending").exists());
    }

    #[test]
    fn test_missing_file() {
        let (_dir, storage) = storage();
        let err = storage.open_input("missing.bin").unwrap_err();
        assert!(err.to_string().contains("file not found"));
        assert!(storage.file_size("missing.bin").is_err());
        assert!(storage.remove_file("missing.bin").is_ok());
    }
}
