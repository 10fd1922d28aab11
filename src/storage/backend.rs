//! Byte Storage Backends
//!
//! The [`FileStore`](crate::storage::FileStore) never touches the filesystem
//! directly; it goes through a [`BlobStore`]. Two implementations ship with
//! the crate:
//!
//! - [`FsBlobStore`]: one file per stored name under `<root>/data/`
//! - [`MemoryBlobStore`]: a mutex-guarded map, for tests and benchmarks

use bytes::Bytes;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No file with this name is stored
    #[error("file not found: {0}")]
    NotFound(String),

    /// The name cannot be mapped to a storage location
    #[error("invalid filename '{name}': {reason}")]
    InvalidFilename { name: String, reason: &'static str },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata could not be encoded or decoded
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Checks that a filename maps to exactly one entry inside the storage root.
pub fn validate_filename(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidFilename {
        name: name.to_string(),
        reason,
    })
}

/// Persistent byte storage keyed by filename.
pub trait BlobStore: Send + Sync {
    /// Writes `data`, replacing any previous content. Returns where it landed.
    fn write(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError>;

    /// Reads the full content of `filename`.
    fn read(&self, filename: &str) -> Result<Bytes, StorageError>;

    /// Removes `filename`.
    fn remove(&self, filename: &str) -> Result<(), StorageError>;
}

/// Stores each file as a regular file under `<root>/data/`.
///
/// Writes go to a temporary file in the same directory first and are then
/// renamed into place, so readers never observe a half-written file.
#[derive(Debug)]
pub struct FsBlobStore {
    data_dir: PathBuf,
}

impl FsBlobStore {
    /// Opens (creating if needed) the data directory under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let data_dir = root.as_ref().join("data");
        fs::create_dir_all(&data_dir)?;

        info!(data_dir = %data_dir.display(), "Blob store opened");

        Ok(Self { data_dir })
    }

    /// Directory holding the stored files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, filename: &str) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        Ok(self.data_dir.join(filename))
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.path_for(filename)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(path = %path.display(), size = data.len(), "Wrote blob");
        Ok(path)
    }

    fn read(&self, filename: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(filename)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, filename: &str) -> Result<(), StorageError> {
        let path = self.path_for(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps file content in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), Bytes::copy_from_slice(data));
        Ok(PathBuf::from("memory").join(filename))
    }

    fn read(&self, filename: &str) -> Result<Bytes, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(filename.to_string()))
    }

    fn remove(&self, filename: &str) -> Result<(), StorageError> {
        self.files
            .lock()
            .unwrap()
            .remove(filename)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(filename.to_string()))
    }
}
