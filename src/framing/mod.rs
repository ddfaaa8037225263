//! # Framing Module
//!
//! Consistent Overhead Byte Stuffing (COBS) framing for the serial link.
//!
//! This module handles:
//! - Encoding a message payload into a zero-free block sequence plus delimiter
//! - Decoding a single delimiter-stripped frame back into its payload
//! - Buffering a raw byte stream and splitting it into frames
//! - Dropping malformed frames and resynchronizing at the next delimiter

pub mod cobs;
pub mod stream;

pub use cobs::{decode, encode, FrameError, FRAME_DELIMITER};
pub use stream::FrameDecoder;
