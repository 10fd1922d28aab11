//! File Metadata Records and their Persistence
//!
//! A [`FileRecord`] describes one stored file. The table of records is owned
//! by the [`FileStore`](crate::storage::FileStore), which loads it from a
//! [`MetadataStore`] at startup and hands it back after every mutation.

use crate::storage::backend::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Metadata for a single stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    /// Size in bytes of the most recent successful store
    pub size: u64,
    /// Unix seconds of the first store
    pub created_at: u64,
    /// Unix seconds of the most recent store
    pub modified_at: u64,
    pub storage_path: PathBuf,
    /// Peers this file has been recorded against
    #[serde(default)]
    pub replicas: BTreeSet<String>,
    /// Changes on every store of this file. Held in memory only.
    #[serde(skip)]
    pub generation: u64,
}

impl FileRecord {
    /// Creates a record for a file stored just now.
    pub fn new(filename: impl Into<String>, size: u64, storage_path: PathBuf) -> Self {
        let now = unix_now();
        Self {
            filename: filename.into(),
            size,
            created_at: now,
            modified_at: now,
            storage_path,
            replicas: BTreeSet::new(),
            generation: 0,
        }
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Table type shared by the store and its persistence layer.
pub type MetadataTable = HashMap<String, FileRecord>;

/// Durable home for the metadata table.
pub trait MetadataStore: Send + Sync {
    /// Loads the table saved last, or an empty table if none exists.
    fn load(&self) -> Result<MetadataTable, StorageError>;

    /// Replaces the saved table.
    fn save(&self, table: &MetadataTable) -> Result<(), StorageError>;
}

/// Keeps nothing; every start begins with an empty table.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetadataStore;

impl MetadataStore for NullMetadataStore {
    fn load(&self) -> Result<MetadataTable, StorageError> {
        Ok(MetadataTable::new())
    }

    fn save(&self, _table: &MetadataTable) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Persists the table as a JSON array in a single file.
///
/// Saves write a temporary file next to the target and rename it over the
/// previous version.
#[derive(Debug)]
pub struct JsonMetadataStore {
    path: PathBuf,
}

impl JsonMetadataStore {
    /// Uses `<root>/metadata.json`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join("metadata.json"))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for JsonMetadataStore {
    fn load(&self) -> Result<MetadataTable, StorageError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No metadata file, starting empty");
                return Ok(MetadataTable::new());
            }
            Err(e) => return Err(e.into()),
        };

        let records: Vec<FileRecord> = serde_json::from_slice(&raw)?;
        info!(
            path = %self.path.display(),
            files = records.len(),
            "Loaded metadata"
        );

        Ok(records
            .into_iter()
            .map(|record| (record.filename.clone(), record))
            .collect())
    }

    fn save(&self, table: &MetadataTable) -> Result<(), StorageError> {
        let mut records: Vec<&FileRecord> = table.values().collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        let encoded = serde_json::to_vec_pretty(&records)?;

        let parent = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&encoded)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), files = records.len(), "Saved metadata");
        Ok(())
    }
}
