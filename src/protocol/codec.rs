//! Frame Encoder / Decoder
//!
//! Converts [`RequestFrame`] and [`ResponseFrame`] to and from their
//! fixed-size wire representation. Field order, integer widths and byte
//! order are fixed here rather than taken from any in-memory layout, so two
//! peers agree on the format whatever architecture they run on.
//!
//! Decoding never reads past the frame length and never allocates for
//! anything but the decoded strings.

use crate::protocol::frame::{
    Operation, RequestFrame, ResponseFrame, MAX_FILENAME_LEN, NAME_FIELD_LEN, REQUEST_FRAME_LEN,
    RESPONSE_FRAME_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than a full frame were supplied
    #[error("incomplete frame: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },

    /// Unknown operation code in a request
    #[error("unknown operation code: {0}")]
    UnknownOperation(u32),

    /// Filename does not fit in the fixed-width field
    #[error("filename too long: {len} bytes (max: {max})")]
    FilenameTooLong { len: usize, max: usize },

    /// Filename contains an interior NUL byte
    #[error("filename contains a NUL byte")]
    EmbeddedNul,

    /// A string field is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Encodes a request header.
///
/// Filenames longer than [`MAX_FILENAME_LEN`] bytes are rejected, never
/// truncated.
pub fn encode_request(frame: &RequestFrame) -> ProtocolResult<Bytes> {
    let name = frame.filename.as_bytes();
    if name.len() > MAX_FILENAME_LEN {
        return Err(ProtocolError::FilenameTooLong {
            len: name.len(),
            max: MAX_FILENAME_LEN,
        });
    }
    if name.contains(&0) {
        return Err(ProtocolError::EmbeddedNul);
    }

    let mut buf = BytesMut::with_capacity(REQUEST_FRAME_LEN);
    buf.put_u32_le(frame.operation.code());
    put_name_field(&mut buf, name);
    buf.put_u64_le(frame.data_size);
    buf.put_bytes(0, 4);

    debug_assert_eq!(buf.len(), REQUEST_FRAME_LEN);
    Ok(buf.freeze())
}

/// Decodes a request header from the first [`REQUEST_FRAME_LEN`] bytes of `buf`.
pub fn decode_request(buf: &[u8]) -> ProtocolResult<RequestFrame> {
    if buf.len() < REQUEST_FRAME_LEN {
        return Err(ProtocolError::Incomplete {
            expected: REQUEST_FRAME_LEN,
            actual: buf.len(),
        });
    }

    let mut buf = &buf[..REQUEST_FRAME_LEN];
    let code = buf.get_u32_le();
    let filename = take_name_field(&mut buf)?;
    let data_size = buf.get_u64_le();
    // The trailing reserved bytes are ignored.

    let operation = Operation::from_code(code).ok_or(ProtocolError::UnknownOperation(code))?;

    Ok(RequestFrame {
        operation,
        filename,
        data_size,
    })
}

/// Encodes a response header.
///
/// The message is diagnostic text; anything past [`MAX_FILENAME_LEN`] bytes is
/// cut at the nearest character boundary.
pub fn encode_response(frame: &ResponseFrame) -> Bytes {
    let message = truncate_utf8(&frame.message, MAX_FILENAME_LEN);

    let mut buf = BytesMut::with_capacity(RESPONSE_FRAME_LEN);
    buf.put_u8(u8::from(frame.success));
    buf.put_bytes(0, 3);
    put_name_field(&mut buf, message.as_bytes());
    buf.put_u64_le(frame.data_size);

    debug_assert_eq!(buf.len(), RESPONSE_FRAME_LEN);
    buf.freeze()
}

/// Decodes a response header from the first [`RESPONSE_FRAME_LEN`] bytes of `buf`.
pub fn decode_response(buf: &[u8]) -> ProtocolResult<ResponseFrame> {
    if buf.len() < RESPONSE_FRAME_LEN {
        return Err(ProtocolError::Incomplete {
            expected: RESPONSE_FRAME_LEN,
            actual: buf.len(),
        });
    }

    let mut buf = &buf[..RESPONSE_FRAME_LEN];
    let success = buf.get_u8() != 0;
    buf.advance(3);
    let message = take_name_field(&mut buf)?;
    let data_size = buf.get_u64_le();

    Ok(ResponseFrame {
        success,
        message,
        data_size,
    })
}

/// Writes `value` into a NUL-padded field. Caller guarantees it fits.
fn put_name_field(buf: &mut BytesMut, value: &[u8]) {
    buf.put_slice(value);
    buf.put_bytes(0, NAME_FIELD_LEN - value.len());
}

/// Reads a NUL-terminated field, consuming all [`NAME_FIELD_LEN`] bytes.
fn take_name_field(buf: &mut &[u8]) -> ProtocolResult<String> {
    let field = &buf[..NAME_FIELD_LEN];
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::FilenameTooLong {
            len: NAME_FIELD_LEN,
            max: MAX_FILENAME_LEN,
        })?;

    let value = std::str::from_utf8(&field[..end])
        .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?
        .to_string();

    buf.advance(NAME_FIELD_LEN);
    Ok(value)
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let frame = RequestFrame::store("a.txt", 5);
        let bytes = encode_request(&frame).unwrap();

        assert_eq!(bytes.len(), REQUEST_FRAME_LEN);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..9], b"a.txt");
        assert!(bytes[9..260].iter().all(|&b| b == 0));
        assert_eq!(&bytes[260..268], &5u64.to_le_bytes());
        assert_eq!(&bytes[268..272], &[0, 0, 0, 0]);

        assert_eq!(decode_request(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_response_layout() {
        let frame = ResponseFrame::success("File retrieved successfully", 11);
        let bytes = encode_response(&frame);

        assert_eq!(bytes.len(), RESPONSE_FRAME_LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[4..31], b"File retrieved successfully");
        assert_eq!(&bytes[260..268], &11u64.to_le_bytes());

        assert_eq!(decode_response(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_max_length_filename_accepted() {
        let name = "f".repeat(MAX_FILENAME_LEN);
        let bytes = encode_request(&RequestFrame::retrieve(name.clone())).unwrap();
        assert_eq!(decode_request(&bytes).unwrap().filename, name);
    }

    #[test]
    fn test_long_filename_rejected() {
        let name = "f".repeat(MAX_FILENAME_LEN + 1);
        let err = encode_request(&RequestFrame::retrieve(name)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FilenameTooLong {
                len: 256,
                max: 255
            }
        );
    }

    #[test]
    fn test_unterminated_filename_rejected_on_decode() {
        let mut raw = vec![0u8; REQUEST_FRAME_LEN];
        raw[0] = 2;
        raw[4..260].fill(b'x');

        assert!(matches!(
            decode_request(&raw),
            Err(ProtocolError::FilenameTooLong { .. })
        ));
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let err = encode_request(&RequestFrame::delete("a\0b")).unwrap_err();
        assert_eq!(err, ProtocolError::EmbeddedNul);
    }

    #[test]
    fn test_unknown_operation() {
        let mut raw = encode_request(&RequestFrame::list()).unwrap().to_vec();
        raw[0..4].copy_from_slice(&9u32.to_le_bytes());

        assert_eq!(
            decode_request(&raw),
            Err(ProtocolError::UnknownOperation(9))
        );
    }

    #[test]
    fn test_incomplete_frames() {
        assert_eq!(
            decode_request(&[1, 0, 0]),
            Err(ProtocolError::Incomplete {
                expected: REQUEST_FRAME_LEN,
                actual: 3
            })
        );
        assert!(matches!(
            decode_response(&[0u8; 100]),
            Err(ProtocolError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_filename() {
        let mut raw = encode_request(&RequestFrame::retrieve("ab")).unwrap().to_vec();
        raw[4] = 0xff;

        assert!(matches!(
            decode_request(&raw),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_long_message_truncated_on_char_boundary() {
        // 'é' is two bytes, so 200 of them cannot split evenly at 255.
        let message = "é".repeat(200);
        let bytes = encode_response(&ResponseFrame::failure(message));
        let decoded = decode_response(&bytes).unwrap();

        assert_eq!(decoded.message.len(), 254);
        assert!(decoded.message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_nonzero_success_byte_reads_true() {
        let mut raw = encode_response(&ResponseFrame::failure("x")).to_vec();
        raw[0] = 7;
        assert!(decode_response(&raw).unwrap().success);
    }
}
