//! Storage Wire Protocol
//!
//! This module implements the binary framing used between clients and the
//! storage node.
//!
//! ## Overview
//!
//! Every connection carries exactly one exchange:
//!
//! ```text
//! client ── RequestFrame [+ data_size payload bytes if STORE] ──> server
//! client <── ResponseFrame [+ data_size payload bytes if RETRIEVE/LIST] ── server
//! ```
//!
//! ## Modules
//!
//! - `frame`: Defines the frame types and their wire sizes
//! - `codec`: Explicit little-endian encoder and decoder
//!
//! ## Example
//!
//! ```
//! use flashstore::protocol::{decode_request, encode_request, RequestFrame};
//!
//! let bytes = encode_request(&RequestFrame::store("a.txt", 5)).unwrap();
//! let frame = decode_request(&bytes).unwrap();
//! assert_eq!(frame.filename, "a.txt");
//! ```

pub mod codec;
pub mod frame;

// Re-export commonly used types for convenience
pub use codec::{
    decode_request, decode_response, encode_request, encode_response, ProtocolError,
    ProtocolResult,
};
pub use frame::{
    Operation, RequestFrame, ResponseFrame, MAX_FILENAME_LEN, REQUEST_FRAME_LEN,
    RESPONSE_FRAME_LEN,
};
