//! Command Handler Module
//!
//! Turns a decoded request into calls on the [`FileStore`] and builds the
//! reply that goes back on the wire.
//!
//! ## Supported Operations
//!
//! - `STORE filename <payload>` - Store or overwrite a file, then record it
//!   against every configured peer
//! - `RETRIEVE filename` - Return a file's content
//! - `DELETE filename` - Remove a file, then evict it from every peer
//! - `LIST` - Return one `"<filename> (<size> bytes)"` line per file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  cmd_*()    │───>│  replicate  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                            │                  │             │
//! │                            ▼                  ▼             │
//! │                       FileStore        ReplicaTransport     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The handler is synchronous. The connection layer runs it on the blocking
//! thread pool because the store may hit the disk.

use crate::commands::replication::{NoopTransport, ReplicaTransport};
use crate::protocol::{Operation, RequestFrame, ResponseFrame};
use crate::storage::{FileStore, StorageError};
use bytes::Bytes;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// A response header plus the payload that follows it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: ResponseFrame,
    pub body: Option<Bytes>,
}

impl Reply {
    /// A reply consisting of the header alone.
    pub fn header_only(header: ResponseFrame) -> Self {
        Self { header, body: None }
    }

    /// A successful reply whose header announces `body.len()` payload bytes.
    pub fn with_body(message: impl Into<String>, body: Bytes) -> Self {
        Self {
            header: ResponseFrame::success(message, body.len() as u64),
            body: Some(body),
        }
    }

    /// A failed reply.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::header_only(ResponseFrame::failure(message))
    }
}

/// Executes storage requests against a shared [`FileStore`].
#[derive(Clone)]
pub struct CommandHandler {
    /// The file store
    store: Arc<FileStore>,
    /// Peers every stored file is recorded against
    peers: Arc<[String]>,
    /// Moves replica bytes to peers
    transport: Arc<dyn ReplicaTransport>,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("store", &self.store)
            .field("peers", &self.peers)
            .finish()
    }
}

impl CommandHandler {
    /// Creates a handler with no peers and a no-op transport.
    pub fn new(store: Arc<FileStore>) -> Self {
        Self {
            store,
            peers: Arc::from(Vec::new()),
            transport: Arc::new(NoopTransport),
        }
    }

    /// Sets the peers every stored file is recorded against.
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = Arc::from(peers);
        self
    }

    /// Replaces the replica transport.
    pub fn with_transport(mut self, transport: Arc<dyn ReplicaTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// The configured peers.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Executes a request and returns the reply to send.
    ///
    /// # Arguments
    ///
    /// * `request` - The decoded request header
    /// * `payload` - The bytes that followed the header (empty unless STORE)
    pub fn execute(&self, request: &RequestFrame, payload: Bytes) -> Reply {
        debug!(
            operation = %request.operation,
            filename = %request.filename,
            size = payload.len(),
            "Executing request"
        );

        match request.operation {
            Operation::Store => self.cmd_store(&request.filename, payload),
            Operation::Retrieve => self.cmd_retrieve(&request.filename),
            Operation::Delete => self.cmd_delete(&request.filename),
            Operation::List => self.cmd_list(),
        }
    }

    /// STORE
    fn cmd_store(&self, filename: &str, data: Bytes) -> Reply {
        match self.store.store(filename, data.clone()) {
            Ok(record) => {
                self.replicate(filename, &data);
                Reply::header_only(ResponseFrame::success(
                    "File stored successfully",
                    record.size,
                ))
            }
            Err(e) => {
                warn!(filename = %filename, error = %e, "Store failed");
                Reply::failure(format!("Failed to store file: {}", e))
            }
        }
    }

    /// RETRIEVE
    fn cmd_retrieve(&self, filename: &str) -> Reply {
        match self.store.retrieve(filename) {
            Ok(data) => Reply::with_body("File retrieved successfully", data),
            Err(StorageError::NotFound(_)) => Reply::failure("File not found"),
            Err(e) => {
                warn!(filename = %filename, error = %e, "Retrieve failed");
                Reply::failure(format!("Failed to retrieve file: {}", e))
            }
        }
    }

    /// DELETE
    fn cmd_delete(&self, filename: &str) -> Reply {
        match self.store.delete(filename) {
            Ok(_) => {
                self.evict_replicas(filename);
                Reply::header_only(ResponseFrame::success("File deleted successfully", 0))
            }
            Err(StorageError::NotFound(_)) => Reply::failure("File not found"),
            Err(e) => {
                warn!(filename = %filename, error = %e, "Delete failed");
                Reply::failure(format!("Failed to delete file: {}", e))
            }
        }
    }

    /// LIST
    fn cmd_list(&self) -> Reply {
        let mut names = self.store.list();
        names.sort();

        let mut listing = String::new();
        let mut count = 0usize;
        for name in names {
            // A file deleted since list() is simply skipped.
            if let Some(record) = self.store.metadata(&name) {
                let _ = writeln!(listing, "{} ({} bytes)", name, record.size);
                count += 1;
            }
        }

        Reply::with_body(format!("{} files found", count), Bytes::from(listing))
    }

    /// Records `filename` against every peer and hands the bytes to the transport.
    fn replicate(&self, filename: &str, data: &Bytes) {
        for peer in self.peers.iter() {
            self.store.add_replica(filename, peer);
            if let Err(e) = self.transport.push(filename, data, peer) {
                warn!(filename = %filename, peer = %peer, error = %e, "Replica push failed");
            }
        }
    }

    /// Asks every peer to drop `filename`.
    ///
    /// The record, and with it the replica set, is already gone by now.
    fn evict_replicas(&self, filename: &str) {
        for peer in self.peers.iter() {
            if let Err(e) = self.transport.evict(filename, peer) {
                warn!(filename = %filename, peer = %peer, error = %e, "Replica evict failed");
            }
        }
    }
}
