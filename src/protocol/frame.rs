//! Storage Protocol Frame Types
//!
//! This module defines the two fixed-layout frames exchanged on the wire.
//! Every connection carries exactly one request frame (optionally followed by
//! a payload) and one response frame (optionally followed by a payload).
//!
//! ## Layout
//!
//! ```text
//! Request (272 bytes)
//! ┌───────────┬──────────────────────────┬────────────┬──────────┐
//! │ op: u32LE │ filename: [u8; 256] NUL  │ size: u64LE│ reserved │
//! │  0..4     │  4..260                  │  260..268  │ 268..272 │
//! └───────────┴──────────────────────────┴────────────┴──────────┘
//!
//! Response (268 bytes)
//! ┌────────┬──────────┬──────────────────────────┬────────────┐
//! │ ok: u8 │ reserved │ message: [u8; 256] NUL   │ size: u64LE│
//! │  0     │  1..4    │  4..260                  │  260..268  │
//! └────────┴──────────┴──────────────────────────┴────────────┘
//! ```
//!
//! All integers are little-endian regardless of the host architecture.

use std::fmt;

/// Width of the filename and message buffers, including the NUL terminator.
pub const NAME_FIELD_LEN: usize = 256;

/// Longest filename that fits in a frame.
pub const MAX_FILENAME_LEN: usize = NAME_FIELD_LEN - 1;

/// Encoded size of a [`RequestFrame`].
pub const REQUEST_FRAME_LEN: usize = 4 + NAME_FIELD_LEN + 8 + 4;

/// Encoded size of a [`ResponseFrame`].
pub const RESPONSE_FRAME_LEN: usize = 1 + 3 + NAME_FIELD_LEN + 8;

/// Operation requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    /// Upload a file; the frame is followed by `data_size` payload bytes.
    Store = 1,
    /// Download a file.
    Retrieve = 2,
    /// Remove a file.
    Delete = 3,
    /// List every stored file with its size.
    List = 4,
}

impl Operation {
    /// Wire code for this operation.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire code back to an operation.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Operation::Store),
            2 => Some(Operation::Retrieve),
            3 => Some(Operation::Delete),
            4 => Some(Operation::List),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Store => "STORE",
            Operation::Retrieve => "RETRIEVE",
            Operation::Delete => "DELETE",
            Operation::List => "LIST",
        };
        f.write_str(name)
    }
}

/// A decoded request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub operation: Operation,
    pub filename: String,
    /// Payload bytes following the header (STORE only).
    pub data_size: u64,
}

impl RequestFrame {
    pub fn new(operation: Operation, filename: impl Into<String>, data_size: u64) -> Self {
        Self {
            operation,
            filename: filename.into(),
            data_size,
        }
    }

    pub fn store(filename: impl Into<String>, data_size: u64) -> Self {
        Self::new(Operation::Store, filename, data_size)
    }

    pub fn retrieve(filename: impl Into<String>) -> Self {
        Self::new(Operation::Retrieve, filename, 0)
    }

    pub fn delete(filename: impl Into<String>) -> Self {
        Self::new(Operation::Delete, filename, 0)
    }

    pub fn list() -> Self {
        Self::new(Operation::List, "", 0)
    }
}

/// A response header.
///
/// `data_size` tells the client how many payload bytes follow the header.
/// For STORE it echoes the number of bytes stored and nothing follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub success: bool,
    pub message: String,
    pub data_size: u64,
}

impl ResponseFrame {
    /// Creates a successful response.
    pub fn success(message: impl Into<String>, data_size: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            data_size,
        }
    }

    /// Creates a failed response carrying no payload.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data_size: 0,
        }
    }
}
