//! # Calibration Module
//!
//! Turns noisy raw sensor readings into a normalized lever position.
//!
//! ## Logical-raw space
//!
//! Stored boundaries are kept in "logical-raw" space: for an inverted sensor
//! every raw value `r` is first mirrored to `max_hardware_value - r`, so
//! travel always increases from `min_value` to `max_value`. For a sensor whose
//! travel wraps past the top of its range, `max_value` is stored unwrapped
//! (greater than `max_hardware_value`).
//!
//! ## Usage
//!
//! ```
//! use train_io_bridge::calibration::Calibration;
//!
//! let cal = Calibration {
//!     min_value: 10,
//!     max_value: 150,
//!     max_hardware_value: 1023,
//!     is_inverted: false,
//!     has_rollover: false,
//! };
//!
//! assert_eq!(cal.normalize(80), 70);
//! assert_eq!(cal.normalize(200), 140); // clamped to total travel
//! ```

pub mod analyzer;
pub mod calculator;
pub mod recorder;

pub use analyzer::Analysis;
pub use recorder::{Phase, Recorder};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default full-scale value of a 10-bit ADC
pub const DEFAULT_MAX_HARDWARE_VALUE: i32 = 1023;

/// Largest full-scale value a board can report (raw samples are 16 bit)
pub const MAX_HARDWARE_VALUE_LIMIT: i32 = u16::MAX as i32;

/// Calibration could not be derived from the collected samples
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("no samples collected for the {0} phase")]
    MissingSamples(&'static str),

    #[error("calibrated travel is empty (min {min}, max {max})")]
    NoTravel { min: i32, max: i32 },

    #[error("max hardware value must be in 1..=65535, got {0}")]
    InvalidHardwareRange(i32),

    #[error("calibration boundary {value} is outside 0..={limit}")]
    BoundaryOutOfRange { value: i32, limit: i32 },
}

/// Stored calibration of one analog input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    /// Start of travel in logical-raw space
    pub min_value: i32,

    /// End of travel in logical-raw space (unwrapped when rolling over)
    pub max_value: i32,

    /// Largest raw value the sensor can report
    #[serde(default = "default_max_hardware_value")]
    pub max_hardware_value: i32,

    #[serde(default)]
    pub is_inverted: bool,

    #[serde(default)]
    pub has_rollover: bool,
}

fn default_max_hardware_value() -> i32 {
    DEFAULT_MAX_HARDWARE_VALUE
}

impl Calibration {
    /// Maps a raw sample to `0..=total_travel()`.
    #[must_use]
    pub fn normalize(&self, raw: i32) -> i32 {
        calculator::normalize(raw, self)
    }

    /// Length of the calibrated travel.
    #[must_use]
    pub fn total_travel(&self) -> i32 {
        calculator::total_travel(self)
    }

    /// Checks that the calibration describes a usable, non-empty travel.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] if the hardware range is not in
    /// `1..=MAX_HARDWARE_VALUE_LIMIT`, a boundary lies outside two full
    /// sensor revolutions, or the travel is empty.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(1..=MAX_HARDWARE_VALUE_LIMIT).contains(&self.max_hardware_value) {
            return Err(CalibrationError::InvalidHardwareRange(self.max_hardware_value));
        }
        // Unwrapped rollover boundaries stay below two spans
        let limit = 2 * (self.max_hardware_value + 1);
        for value in [self.min_value, self.max_value] {
            if !(0..=limit).contains(&value) {
                return Err(CalibrationError::BoundaryOutOfRange { value, limit });
            }
        }
        if self.total_travel() <= 0 {
            return Err(CalibrationError::NoTravel {
                min: self.min_value,
                max: self.max_value,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_normal_calibration() {
        let cal = Calibration {
            min_value: 10,
            max_value: 150,
            max_hardware_value: 1023,
            is_inverted: false,
            has_rollover: false,
        };
        assert!(cal.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_travel() {
        let cal = Calibration {
            min_value: 300,
            max_value: 300,
            max_hardware_value: 1023,
            is_inverted: false,
            has_rollover: false,
        };
        assert_eq!(cal.validate(), Err(CalibrationError::NoTravel { min: 300, max: 300 }));
    }

    #[test]
    fn test_validate_rejects_bad_hardware_range() {
        let cal = Calibration {
            min_value: 0,
            max_value: 10,
            max_hardware_value: 0,
            is_inverted: false,
            has_rollover: false,
        };
        assert!(matches!(cal.validate(), Err(CalibrationError::InvalidHardwareRange(0))));
    }

    #[test]
    fn test_validate_rejects_extreme_boundaries() {
        let cal = Calibration {
            min_value: i32::MIN,
            max_value: i32::MAX,
            max_hardware_value: 1023,
            is_inverted: true,
            has_rollover: true,
        };
        assert_eq!(
            cal.validate(),
            Err(CalibrationError::BoundaryOutOfRange { value: i32::MIN, limit: 2048 })
        );

        let cal = Calibration { min_value: 10, max_value: 2049, ..cal };
        assert_eq!(
            cal.validate(),
            Err(CalibrationError::BoundaryOutOfRange { value: 2049, limit: 2048 })
        );
    }

    #[test]
    fn test_validate_rejects_huge_hardware_range() {
        let cal = Calibration {
            min_value: 0,
            max_value: 10,
            max_hardware_value: i32::MAX,
            is_inverted: false,
            has_rollover: false,
        };
        assert!(matches!(cal.validate(), Err(CalibrationError::InvalidHardwareRange(i32::MAX))));
    }

    #[test]
    fn test_validate_accepts_unwrapped_rollover_end() {
        let cal = Calibration {
            min_value: 1010,
            max_value: 1034,
            max_hardware_value: 1023,
            is_inverted: false,
            has_rollover: true,
        };
        assert!(cal.validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let cal: Calibration = toml::from_str("min_value = 5\nmax_value = 900\n").unwrap();
        assert_eq!(cal.max_hardware_value, DEFAULT_MAX_HARDWARE_VALUE);
        assert!(!cal.is_inverted);
        assert!(!cal.has_rollover);
    }
}
