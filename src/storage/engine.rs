//! File Store
//!
//! This module implements the data-management core of the storage node: the
//! metadata table (filename → [`FileRecord`]) and a [`RecencyCache`] of hot
//! file contents, both sitting in front of a [`BlobStore`].
//!
//! ## Locking
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        FileStore                         │
//! │                                                          │
//! │   ┌─────────────────────┐      ┌─────────────────────┐   │
//! │   │ Mutex<MetadataTable>│      │ RecencyCache        │   │
//! │   │ filename → record   │      │ (own internal lock) │   │
//! │   └─────────────────────┘      └─────────────────────┘   │
//! │              │                                           │
//! │              ▼                                           │
//! │      MetadataStore::save                                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! No method holds the metadata lock while it calls into the cache, and the
//! cache never calls back into the store. The two locks therefore have no
//! ordering between them and cannot deadlock.
//!
//! ## Same-file ordering
//!
//! Operations on one filename are ordered by a striped file lock (64 stripes,
//! picked by hashing the name). A store holds it across the blob write and
//! the metadata upsert, a delete across the blob removal and the metadata
//! removal, a cache-miss retrieve across the generation lookup and the blob
//! read. The file lock is always taken first, may be held while the metadata
//! lock is taken, and is released before the cache is touched.
//!
//! Every store stamps its record with a fresh generation. Cache entries carry
//! the generation they were read or written under. A hit only counts if the
//! record still has that generation, and every insert re-checks the
//! generation afterwards, erasing the entry if a store or delete overtook it.
//!
//! ## Persistence cost
//!
//! The metadata table is saved while its lock is held so that saves happen
//! in the same order as the mutations they capture. Each save rewrites the
//! whole snapshot, so a store, delete or replica change costs O(files) and
//! stalls other metadata readers until the save finishes.

use crate::storage::backend::{
    validate_filename, BlobStore, FsBlobStore, MemoryBlobStore, StorageError,
};
use crate::storage::cache::RecencyCache;
use crate::storage::metadata::{
    unix_now, FileRecord, JsonMetadataStore, MetadataStore, MetadataTable, NullMetadataStore,
};
use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Number of file payloads kept in memory by default.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Number of stripes in the per-filename lock table
const FILE_LOCK_STRIPES: usize = 64;

/// Stores files, tracks their metadata and caches recently used content.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared by every worker. All
/// operations take `&self`.
///
/// # Example
///
/// ```
/// use flashstore::storage::FileStore;
/// use bytes::Bytes;
///
/// let store = FileStore::in_memory(16);
///
/// store.store("a.txt", Bytes::from("hello")).unwrap();
/// assert_eq!(store.retrieve("a.txt").unwrap(), Bytes::from("hello"));
///
/// store.delete("a.txt").unwrap();
/// assert!(store.retrieve("a.txt").is_err());
/// ```
pub struct FileStore {
    /// Underlying byte storage
    blobs: Arc<dyn BlobStore>,

    /// Where the metadata table is saved
    persistence: Arc<dyn MetadataStore>,

    /// filename → record
    metadata: Mutex<MetadataTable>,

    /// Recently stored or retrieved payloads, tagged with their generation
    cache: RecencyCache<String, (u64, Bytes)>,

    /// Orders blob and metadata changes for the same filename
    file_locks: Box<[Mutex<()>]>,

    /// Next generation handed to a store
    next_generation: AtomicU64,

    /// Statistics: retrieves answered from the cache
    cache_hits: AtomicU64,

    /// Statistics: retrieves that went to the blob store
    cache_misses: AtomicU64,

    /// Statistics: successful stores
    store_count: AtomicU64,

    /// Statistics: retrieve calls
    retrieve_count: AtomicU64,

    /// Statistics: successful deletes
    delete_count: AtomicU64,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("files", &self.total_files())
            .field("cached", &self.cache.size())
            .field("cache_capacity", &self.cache.capacity())
            .finish()
    }
}

impl FileStore {
    /// Creates a store over the given collaborators, loading any saved metadata.
    pub fn open(
        blobs: Arc<dyn BlobStore>,
        persistence: Arc<dyn MetadataStore>,
        cache_capacity: usize,
    ) -> Result<Self, StorageError> {
        let table = persistence.load()?;

        info!(
            files = table.len(),
            cache_capacity = cache_capacity,
            "File store initialized"
        );

        Ok(Self::with_table(blobs, persistence, table, cache_capacity))
    }

    /// Opens a store rooted at `root`: file content under `root/data/`,
    /// metadata in `root/metadata.json`.
    pub fn open_dir(root: impl AsRef<Path>, cache_capacity: usize) -> Result<Self, StorageError> {
        let root = root.as_ref();
        let blobs = Arc::new(FsBlobStore::open(root)?);
        let persistence = Arc::new(JsonMetadataStore::in_dir(root));
        Self::open(blobs, persistence, cache_capacity)
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory(cache_capacity: usize) -> Self {
        Self::with_table(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(NullMetadataStore),
            MetadataTable::new(),
            cache_capacity,
        )
    }

    fn with_table(
        blobs: Arc<dyn BlobStore>,
        persistence: Arc<dyn MetadataStore>,
        table: MetadataTable,
        cache_capacity: usize,
    ) -> Self {
        Self {
            blobs,
            persistence,
            metadata: Mutex::new(table),
            cache: RecencyCache::new(cache_capacity),
            file_locks: (0..FILE_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            // Loaded records carry generation 0.
            next_generation: AtomicU64::new(1),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            store_count: AtomicU64::new(0),
            retrieve_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        }
    }

    /// Locks the stripe that orders operations on `filename`.
    fn file_lock(&self, filename: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        filename.hash(&mut hasher);
        let index = (hasher.finish() as usize) % FILE_LOCK_STRIPES;
        self.file_locks[index].lock().unwrap()
    }

    /// Current generation of `filename`, or `None` if it has no record.
    fn generation(&self, filename: &str) -> Option<u64> {
        self.metadata
            .lock()
            .unwrap()
            .get(filename)
            .map(|record| record.generation)
    }

    /// Caches `data` as generation `generation` of `filename`, then drops it
    /// again if the record has moved on or gone in the meantime.
    fn cache_if_current(&self, filename: &str, generation: u64, data: Bytes) {
        self.cache.put(filename.to_string(), (generation, data));

        if self.generation(filename) != Some(generation) {
            self.cache.erase(filename);
            trace!(filename = %filename, generation = generation, "Dropped stale cache entry");
        }
    }

    /// Saves the table. Called with the metadata lock held.
    fn persist(&self, table: &MetadataTable) {
        if let Err(e) = self.persistence.save(table) {
            warn!(error = %e, "Failed to save metadata");
        }
    }

    /// Stores `data` under `filename`, replacing any previous content.
    ///
    /// A failed write leaves the metadata untouched. On overwrite the
    /// record keeps its creation time and replica set.
    ///
    /// # Returns
    ///
    /// The record as it stands after the store.
    pub fn store(&self, filename: &str, data: Bytes) -> Result<FileRecord, StorageError> {
        validate_filename(filename)?;
        let size = data.len() as u64;

        let record = {
            let _file = self.file_lock(filename);
            let path = self.blobs.write(filename, &data)?;

            let mut table = self.metadata.lock().unwrap();
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let record = table
                .entry(filename.to_string())
                .and_modify(|record| {
                    record.size = size;
                    record.modified_at = unix_now();
                    record.storage_path = path.clone();
                })
                .or_insert_with(|| FileRecord::new(filename, size, path));
            record.generation = generation;
            let record = record.clone();
            self.persist(&table);
            record
        };

        self.cache_if_current(filename, record.generation, data);
        self.store_count.fetch_add(1, Ordering::Relaxed);

        debug!(filename = %filename, size = size, "Stored file");
        Ok(record)
    }

    /// Returns the content of `filename`.
    ///
    /// Served from the cache when the cached generation is still current.
    /// Otherwise the blob store is read and the result cached, unless a
    /// concurrent store or delete has overtaken it.
    pub fn retrieve(&self, filename: &str) -> Result<Bytes, StorageError> {
        self.retrieve_count.fetch_add(1, Ordering::Relaxed);

        if let Some((generation, data)) = self.cache.get(filename) {
            if self.generation(filename) == Some(generation) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(filename = %filename, "Cache hit");
                return Ok(data);
            }
            self.cache.erase(filename);
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        validate_filename(filename)?;

        let (generation, data) = {
            let _file = self.file_lock(filename);
            let generation = self
                .generation(filename)
                .ok_or_else(|| StorageError::NotFound(filename.to_string()))?;
            (generation, self.blobs.read(filename)?)
        };

        self.cache_if_current(filename, generation, data.clone());

        trace!(filename = %filename, size = data.len(), "Cache miss, read from storage");
        Ok(data)
    }

    /// Deletes `filename`: its content, its record and its cache entry.
    ///
    /// Unknown filenames yield [`StorageError::NotFound`] and change nothing.
    ///
    /// # Returns
    ///
    /// The removed record, including the replicas it had recorded.
    pub fn delete(&self, filename: &str) -> Result<FileRecord, StorageError> {
        let record = {
            let _file = self.file_lock(filename);
            if !self.exists(filename) {
                return Err(StorageError::NotFound(filename.to_string()));
            }

            match self.blobs.remove(filename) {
                Ok(()) => {}
                Err(StorageError::NotFound(_)) => {
                    // The record outlived its content; drop the record anyway.
                    warn!(filename = %filename, "Stored content already missing");
                }
                Err(e) => return Err(e),
            }

            let mut table = self.metadata.lock().unwrap();
            let record = table
                .remove(filename)
                .ok_or_else(|| StorageError::NotFound(filename.to_string()))?;
            self.persist(&table);
            record
        };

        self.cache.erase(filename);
        self.delete_count.fetch_add(1, Ordering::Relaxed);

        debug!(filename = %filename, "Deleted file");
        Ok(record)
    }

    /// Checks whether `filename` has a metadata record.
    pub fn exists(&self, filename: &str) -> bool {
        self.metadata.lock().unwrap().contains_key(filename)
    }

    /// Returns a copy of the record for `filename`, if it exists.
    pub fn metadata(&self, filename: &str) -> Option<FileRecord> {
        self.metadata.lock().unwrap().get(filename).cloned()
    }

    /// Names of every stored file. The order carries no meaning.
    pub fn list(&self) -> Vec<String> {
        self.metadata.lock().unwrap().keys().cloned().collect()
    }

    /// Records that `peer` holds a replica of `filename`.
    ///
    /// Peers form a set: recording one twice has no further effect.
    ///
    /// # Returns
    ///
    /// `false` if `filename` is unknown.
    pub fn add_replica(&self, filename: &str, peer: &str) -> bool {
        let mut table = self.metadata.lock().unwrap();
        let Some(record) = table.get_mut(filename) else {
            return false;
        };

        if record.replicas.insert(peer.to_string()) {
            self.persist(&table);
        }
        true
    }

    /// Forgets that `peer` holds a replica of `filename`.
    ///
    /// # Returns
    ///
    /// `true` if the peer was recorded against the file.
    pub fn remove_replica(&self, filename: &str, peer: &str) -> bool {
        let mut table = self.metadata.lock().unwrap();
        let removed = table
            .get_mut(filename)
            .map(|record| record.replicas.remove(peer))
            .unwrap_or(false);

        if removed {
            self.persist(&table);
        }
        removed
    }

    /// Number of stored files.
    pub fn total_files(&self) -> usize {
        self.metadata.lock().unwrap().len()
    }

    /// Sum of the sizes of all stored files.
    pub fn total_size(&self) -> u64 {
        self.metadata
            .lock()
            .unwrap()
            .values()
            .map(|record| record.size)
            .sum()
    }

    /// Returns true if the content of `filename` is currently cached.
    pub fn is_cached(&self, filename: &str) -> bool {
        self.cache.contains(filename)
    }

    /// Drops every cached payload. Metadata and stored content are kept.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let (files, total_bytes) = {
            let table = self.metadata.lock().unwrap();
            (
                table.len() as u64,
                table.values().map(|record| record.size).sum(),
            )
        };

        StoreStats {
            files,
            total_bytes,
            cached_files: self.cache.size() as u64,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stores: self.store_count.load(Ordering::Relaxed),
            retrieves: self.retrieve_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
        }
    }
}

/// File store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of files currently stored
    pub files: u64,
    /// Sum of stored file sizes
    pub total_bytes: u64,
    /// Number of payloads in the cache
    pub cached_files: u64,
    /// Retrieves served from the cache
    pub cache_hits: u64,
    /// Retrieves that read the blob store
    pub cache_misses: u64,
    /// Successful stores
    pub stores: u64,
    /// Retrieve calls
    pub retrieves: u64,
    /// Successful deletes
    pub deletes: u64,
}
