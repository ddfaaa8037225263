//! # COBS Encoder/Decoder
//!
//! The payload is treated as if a zero terminator were appended, and every
//! zero-terminated run is replaced by a length-prefixed block:
//!
//! ```text
//! payload:  11 22 00 33
//! encoded:  03 11 22 02 33 00
//!           ^^       ^^    ^^ frame delimiter
//!           block codes (block length + 1)
//! ```
//!
//! A block holds at most 254 data bytes. A full block uses code `0xFF` and is
//! not followed by an implicit zero.

use thiserror::Error;

/// Byte that terminates every encoded frame on the wire
pub const FRAME_DELIMITER: u8 = 0x00;

/// Block code for a full 254-byte block without an implicit zero
const MAX_BLOCK_CODE: u8 = 0xFF;

/// Reasons a frame is rejected. These never leave the framing layer as
/// failures of the session; the stream decoder logs them and resynchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Nothing between two delimiters
    #[error("empty frame")]
    Empty,

    /// A zero byte appeared where a block code was expected
    #[error("zero block code at offset {0}")]
    ZeroCode(usize),

    /// A block code announced more bytes than the frame holds
    #[error("block at offset {offset} needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Upper bound on the encoded size of a payload, delimiter included
#[must_use]
pub fn max_encoded_len(payload_len: usize) -> usize {
    payload_len + payload_len / 254 + 2
}

/// Encode a payload into a complete frame
///
/// # Arguments
///
/// * `payload` - Raw message bytes (may contain zeros)
///
/// # Returns
///
/// * `Vec<u8>` - Encoded blocks followed by the [`FRAME_DELIMITER`]
///
/// # Examples
///
/// ```
/// use train_io_bridge::framing::encode;
///
/// assert_eq!(encode(&[0x11, 0x22, 0x00, 0x33]), vec![0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);
/// assert_eq!(encode(&[]), vec![0x01, 0x00]);
/// ```
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(payload.len()));

    // Placeholder for the first block code, patched once the block closes
    let mut code_index = 0;
    out.push(0);
    let mut code: u8 = 1;

    for &byte in payload {
        if byte == 0 {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
            continue;
        }

        out.push(byte);
        code += 1;

        if code == MAX_BLOCK_CODE {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        }
    }

    // Closes the block that ends at the appended terminator
    out[code_index] = code;
    out.push(FRAME_DELIMITER);
    out
}

/// Decode one frame (delimiter already stripped) back into its payload
///
/// A zero is re-inserted after every block whose code is below `0xFF`,
/// except after the final block, which ends at the appended terminator.
///
/// # Errors
///
/// Returns [`FrameError`] if the frame is empty, contains a zero code, or a
/// block runs past the end of the frame.
///
/// # Examples
///
/// ```
/// use train_io_bridge::framing::decode;
///
/// assert_eq!(decode(&[0x03, 0x11, 0x22, 0x02, 0x33]).unwrap(), vec![0x11, 0x22, 0x00, 0x33]);
/// assert!(decode(&[0x05, 0x11]).is_err());
/// ```
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, FrameError> {
    if encoded.is_empty() {
        return Err(FrameError::Empty);
    }

    let mut out = Vec::with_capacity(encoded.len());
    let mut index = 0;

    while index < encoded.len() {
        let code = encoded[index];
        if code == 0 {
            return Err(FrameError::ZeroCode(index));
        }

        let start = index + 1;
        let end = start + (code as usize - 1);
        if end > encoded.len() {
            return Err(FrameError::Truncated {
                offset: index,
                needed: code as usize - 1,
                available: encoded.len() - start,
            });
        }

        let block = &encoded[start..end];
        if let Some(position) = block.iter().position(|&b| b == 0) {
            return Err(FrameError::ZeroCode(start + position));
        }
        out.extend_from_slice(block);

        index = end;
        if code < MAX_BLOCK_CODE && index < encoded.len() {
            out.push(0);
        }
    }

    Ok(out)
}
