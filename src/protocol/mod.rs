//! # Device Protocol Module
//!
//! Binary message protocol spoken with the controller boards.
//!
//! This module handles:
//! - Message definitions and wire type codes
//! - Encoding messages (with domain validation) into frame payloads
//! - Decoding frame payloads into messages with exact length checks
//!
//! Every message starts with a one-byte type code; all multi-byte integers
//! are little-endian. Frames on the wire are COBS encoded, see
//! [`crate::framing`].

pub mod message;
pub mod encoder;
pub mod decoder;

pub use decoder::{decode_message, DecodeError};
pub use encoder::{encode_frame, encode_message, EncodeError};
pub use message::*;
