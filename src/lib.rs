//! # FlashStore - A Networked File Storage Node
//!
//! FlashStore is a single-node object store written in Rust. Clients store,
//! retrieve, delete and list files over a fixed-layout binary TCP protocol.
//! The node persists file bytes, tracks per-file metadata, records which peer
//! nodes hold replicas, and serves hot files from a bounded in-memory cache.
//!
//! ## Features
//!
//! - **Fixed-Frame Protocol**: 272-byte requests, 268-byte replies, little-endian
//! - **Worker Pool**: one acceptor feeding N workers through a bounded queue
//! - **LRU Cache**: recently used payloads are served without touching disk
//! - **Durable Metadata**: records survive restarts via a JSON snapshot
//! - **Replica Bookkeeping**: every record tracks the peers holding a copy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashStore                                 │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Acceptor   │───>│ Worker pool │───>│  Command    │                  │
//! │  │ (listener)  │    │ (N tasks)   │    │  Handler    │──> Replica       │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘    Transport     │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │ Frame codec │    │          FileStore           │ │
//! │                     └─────────────┘    │  ┌──────────┐ ┌────────────┐ │ │
//! │                                        │  │ Metadata │ │RecencyCache│ │ │
//! │                                        │  │  Mutex   │ │   Mutex    │ │ │
//! │                                        │  └────┬─────┘ └────────────┘ │ │
//! │                                        └───────┼──────────────────────┘ │
//! │                                                ▼                        │
//! │                                   BlobStore + MetadataStore (disk)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashstore::server::{RequestDispatcher, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let dispatcher = RequestDispatcher::open(&config).await?;
//!
//!     dispatcher
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Operations
//!
//! | Code | Operation | Request payload | Reply payload |
//! |------|-----------|-----------------|---------------|
//! | 1    | STORE     | file bytes      | none          |
//! | 2    | RETRIEVE  | none            | file bytes    |
//! | 3    | DELETE    | none            | none          |
//! | 4    | LIST      | none            | listing text  |
//!
//! ## Module Overview
//!
//! - [`protocol`]: request/response frames and their codec
//! - [`storage`]: file store, recency cache and persistence collaborators
//! - [`commands`]: executes decoded requests, drives replica bookkeeping
//! - [`connection`]: per-connection read/execute/reply state machine
//! - [`server`]: listener, acceptor and worker pool
//! - [`client`]: async client speaking the same protocol
//!
//! ## Design Highlights
//!
//! ### Independent Locks
//!
//! The metadata table and the cache each sit behind their own mutex, and no
//! code path holds both. The connection queue is a separate channel.
//!
//! ### One Request per Connection
//!
//! A connection carries exactly one request and at most one reply. Short
//! frames are abandoned without a reply; complete frames with bad content
//! get a failure reply.

pub mod client;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{ClientError, StorageClient};
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionLimits, ConnectionStats};
pub use protocol::{Operation, ProtocolError, RequestFrame, ResponseFrame};
pub use server::{RequestDispatcher, ServerConfig, ServerError, ServerHandle};
pub use storage::{FileRecord, FileStore, RecencyCache, StorageError};

/// The default port FlashStore listens on
pub const DEFAULT_PORT: u16 = 9000;

/// The default host FlashStore binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
