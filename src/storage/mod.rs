//! Storage Module
//!
//! This module provides the data-management core of the storage node: a
//! bounded recency cache, the file metadata table, and the pluggable
//! collaborators that persist bytes and metadata.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FileStore                            │
//! │  ┌─────────────────────┐        ┌─────────────────────────┐ │
//! │  │ Metadata table      │        │ RecencyCache            │ │
//! │  │ Mutex<HashMap>      │        │ Mutex<index + list>     │ │
//! │  └──────────┬──────────┘        └─────────────────────────┘ │
//! └─────────────┼──────────────────────────────┬────────────────┘
//!               │                              │
//!               ▼                              ▼
//!      ┌─────────────────┐            ┌─────────────────┐
//!      │  MetadataStore  │            │   BlobStore     │
//!      │  (JSON / null)  │            │  (fs / memory)  │
//!      └─────────────────┘            └─────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Independent Locks**: metadata and cache are locked separately and
//!   never at the same time
//! - **LRU Cache**: hot payloads are served without touching storage
//! - **Atomic Writes**: files and metadata are written via temp file + rename
//! - **Replica Bookkeeping**: each record tracks the peers holding a copy
//!
//! ## Example
//!
//! ```
//! use flashstore::storage::FileStore;
//! use bytes::Bytes;
//!
//! let store = FileStore::in_memory(1000);
//! store.store("notes.txt", Bytes::from("hello")).unwrap();
//! store.add_replica("notes.txt", "10.0.0.2:9000");
//!
//! let record = store.metadata("notes.txt").unwrap();
//! assert_eq!(record.size, 5);
//! assert!(record.replicas.contains("10.0.0.2:9000"));
//! ```

pub mod backend;
pub mod cache;
pub mod engine;
pub mod metadata;

// Re-export commonly used types
pub use backend::{validate_filename, BlobStore, FsBlobStore, MemoryBlobStore, StorageError};
pub use cache::RecencyCache;
pub use engine::{FileStore, StoreStats, DEFAULT_CACHE_CAPACITY};
pub use metadata::{FileRecord, JsonMetadataStore, MetadataStore, MetadataTable, NullMetadataStore};
