//! Command Handler Module
//!
//! This module implements the request processing layer of the storage node.
//! It receives decoded request frames, executes them against the file store,
//! performs replica bookkeeping and returns the reply to send.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame codec    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ CommandHandler  │─────>│ ReplicaTransport │
//! │                 │      └──────────────────┘
//! │  - Dispatch     │
//! │  - Execute      │
//! │  - Replicate    │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   FileStore     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Operations
//!
//! - `STORE`, `RETRIEVE`, `DELETE`, `LIST`

pub mod handler;
pub mod replication;

// Re-export the main command handler
pub use handler::{CommandHandler, Reply};
pub use replication::{NoopTransport, ReplicaTransport, TransportError};
