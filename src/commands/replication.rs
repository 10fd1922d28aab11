//! Replica Transport
//!
//! The storage node records which peers should hold a copy of each file but
//! does not move bytes itself. Moving bytes is the job of a
//! [`ReplicaTransport`], injected into the
//! [`CommandHandler`](crate::commands::CommandHandler).
//!
//! Only [`NoopTransport`] ships with the crate. A networked transport lives
//! outside this crate and plugs in through the same trait.

use bytes::Bytes;
use thiserror::Error;

/// Errors reported by a replica transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    /// The peer refused the operation
    #[error("peer {peer} rejected {filename}: {reason}")]
    Rejected {
        peer: String,
        filename: String,
        reason: String,
    },
}

/// Moves replicas to and from peer nodes.
pub trait ReplicaTransport: Send + Sync {
    /// Sends `data` for `filename` to `peer`.
    fn push(&self, filename: &str, data: &Bytes, peer: &str) -> Result<(), TransportError>;

    /// Asks `peer` to drop its copy of `filename`.
    fn evict(&self, filename: &str, peer: &str) -> Result<(), TransportError>;
}

/// A transport that accepts every request and sends nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

impl ReplicaTransport for NoopTransport {
    fn push(&self, _filename: &str, _data: &Bytes, _peer: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn evict(&self, _filename: &str, _peer: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
