//! # Streaming Frame Decoder
//!
//! Accumulates bytes read from the serial port and yields complete frames.
//! Partial frames stay buffered until their delimiter arrives.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use super::cobs::{decode, FRAME_DELIMITER};

/// Default cap on buffered bytes that have not yet seen a delimiter
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// Splits a byte stream into decoded COBS frames
///
/// # Examples
///
/// ```
/// use train_io_bridge::framing::{encode, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// let frame = encode(&[0x06]);
///
/// // First half: nothing complete yet
/// assert!(decoder.push(&frame[..1]).is_empty());
/// // Second half completes the frame
/// assert_eq!(decoder.push(&frame[1..]), vec![vec![0x06]]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    /// Set after an overflow; bytes are skipped up to the next delimiter
    discarding: bool,
    dropped_frames: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the default frame length cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a decoder that gives up on frames longer than `max_frame_len`.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len),
            max_frame_len,
            discarding: false,
            dropped_frames: 0,
        }
    }

    /// Feeds bytes and returns every frame completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.extend(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Buffers bytes without extracting frames.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extracts the next complete, well-formed frame if one is buffered.
    ///
    /// Malformed frames are counted, logged and skipped.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == FRAME_DELIMITER) else {
                self.enforce_limit();
                return None;
            };

            let encoded = self.buffer.split_to(end);
            self.buffer.advance(1);

            if self.discarding {
                // Tail of an oversized frame
                self.discarding = false;
                continue;
            }

            if encoded.is_empty() {
                // Back-to-back delimiters carry no frame
                continue;
            }

            match decode(&encoded) {
                Ok(payload) => return Some(payload),
                Err(e) => {
                    self.dropped_frames += 1;
                    debug!("Dropping malformed frame ({} bytes): {}", encoded.len(), e);
                }
            }
        }
    }

    /// Discards all buffered bytes, e.g. after flushing a freshly opened port.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Number of bytes waiting for a delimiter
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of malformed or oversized frames dropped so far
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() > self.max_frame_len {
            warn!(
                "No frame delimiter within {} bytes, discarding until next delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
            self.discarding = true;
            self.dropped_frames += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode;
    use proptest::prelude::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&encode(&[0x05, 0x03, 0x00, 0x01]));
        assert_eq!(frames, vec![vec![0x05, 0x03, 0x00, 0x01]]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode(&[0x06]);
        bytes.extend(encode(&[0x03, 0x2A, 0x00, 0x00, 0x00]));
        bytes.extend(encode(&[0x08, 0x07]));

        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], vec![0x06]);
        assert_eq!(frames[1], vec![0x03, 0x2A, 0x00, 0x00, 0x00]);
        assert_eq!(frames[2], vec![0x08, 0x07]);
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut decoder = FrameDecoder::new();
        let frame = encode(&[0x05, 0x10, 0xFF, 0x01]);

        assert!(decoder.push(&frame[..3]).is_empty());
        assert_eq!(decoder.buffered_len(), 3);

        let frames = decoder.push(&frame[3..]);
        assert_eq!(frames, vec![vec![0x05, 0x10, 0xFF, 0x01]]);
    }

    #[test]
    fn test_malformed_frame_is_dropped_and_stream_resyncs() {
        let mut decoder = FrameDecoder::new();
        // Truncated block: code says 5 bytes follow, only 1 does
        let mut bytes = vec![0x06, 0x11, 0x00];
        bytes.extend(encode(&[0x06]));

        let frames = decoder.push(&bytes);
        assert_eq!(frames, vec![vec![0x06]]);
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[test]
    fn test_leading_delimiters_are_ignored() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = vec![0x00, 0x00];
        bytes.extend(encode(&[0x06]));

        assert_eq!(decoder.push(&bytes), vec![vec![0x06]]);
        assert_eq!(decoder.dropped_frames(), 0);
    }

    #[test]
    fn test_oversized_garbage_is_discarded() {
        let mut decoder = FrameDecoder::with_max_frame_len(16);

        assert!(decoder.push(&[0x55; 20]).is_empty());
        assert_eq!(decoder.buffered_len(), 0);

        // Remaining tail of the oversized frame, then a good frame
        let mut bytes = vec![0x55, 0x55, 0x00];
        bytes.extend(encode(&[0x06]));
        assert_eq!(decoder.push(&bytes), vec![vec![0x06]]);
    }

    #[test]
    fn test_clear_discards_partial_data() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x03, 0x11]);
        decoder.clear();

        assert_eq!(decoder.push(&encode(&[0x06])), vec![vec![0x06]]);
    }

    proptest! {
        #[test]
        fn prop_chunked_stream_yields_all_frames(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..40), 1..8),
            chunk in 1usize..17,
        ) {
            let stream: Vec<u8> = payloads.iter().flat_map(|p| encode(p)).collect();
            let mut decoder = FrameDecoder::new();

            let mut frames = Vec::new();
            for piece in stream.chunks(chunk) {
                frames.extend(decoder.push(piece));
            }

            prop_assert_eq!(frames, payloads);
        }
    }
}
