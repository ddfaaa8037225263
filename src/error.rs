//! # Error Types
//!
//! Custom error types for the bridge using `thiserror`.
//!
//! Each layer owns a narrow error enum (`DecodeError`, `EncodeError`,
//! `DiscoveryError`, `CalibrationError`); this module folds them into the
//! crate-level [`BridgeError`] that callers see.

use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::protocol::{DecodeError, EncodeError};
use crate::session::DiscoveryError;

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A frame payload could not be decoded into a message
    #[error("Protocol decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A message violated a domain constraint before it was serialized
    #[error("Protocol encode error: {0}")]
    Encode(#[from] EncodeError),

    /// No device answered on a port
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Stored profile records are malformed or inconsistent
    #[error("Profile error: {0}")]
    Profile(String),

    /// Calibration could not be derived
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// The owning session or controller task has stopped
    #[error("{0} is no longer running")]
    Closed(&'static str),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
