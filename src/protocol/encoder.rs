//! # Message Encoder
//!
//! Serializes messages into frame payloads. Domain constraints are checked
//! first, so an invalid message never reaches the wire.

use std::collections::HashSet;

use thiserror::Error;

use super::message::*;
use crate::framing;

/// A message violated a domain constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("pin {0} is outside the physical range 0-127")]
    PinOutOfRange(u8),

    #[error("sensitivity {0} exceeds 10")]
    SensitivityOutOfRange(u8),

    #[error("{field} is {value}%, must be 0-100")]
    PercentOutOfRange { field: &'static str, value: u8 },

    #[error("part {part_number} of {total_parts} is not a valid part index")]
    InvalidPart { part_number: u8, total_parts: u8 },

    #[error("configuration has no inputs")]
    EmptyConfiguration,

    #[error("matrix needs at least one row and one column")]
    EmptyMatrix,

    #[error("matrix of {rows}x{cols} exceeds 128 cells")]
    MatrixTooLarge { rows: usize, cols: usize },

    #[error("pin {0} is used more than once")]
    DuplicatePin(u8),

    #[error("range {range} references detent {index}, profile has {num_detents}")]
    DetentOutOfRange {
        range: usize,
        index: u8,
        num_detents: usize,
    },

    #[error("range {range} ends at detent {end} before it starts at {start}")]
    ReversedRange { range: usize, start: u8, end: u8 },

    #[error("{field} has {count} entries, at most 255 fit")]
    TooManyEntries { field: &'static str, count: usize },
}

fn check_pin(pin: u8) -> Result<(), EncodeError> {
    if pin > MAX_PHYSICAL_PIN {
        return Err(EncodeError::PinOutOfRange(pin));
    }
    Ok(())
}

fn check_percent(field: &'static str, value: u8) -> Result<(), EncodeError> {
    if value > MAX_PERCENT {
        return Err(EncodeError::PercentOutOfRange { field, value });
    }
    Ok(())
}

fn check_count(field: &'static str, count: usize) -> Result<u8, EncodeError> {
    u8::try_from(count).map_err(|_| EncodeError::TooManyEntries { field, count })
}

impl InputConfig {
    /// Checks pin ranges and per-type parameter limits.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), EncodeError> {
        match self {
            InputConfig::Analog { pin, sensitivity } => {
                check_pin(*pin)?;
                if *sensitivity > MAX_SENSITIVITY {
                    return Err(EncodeError::SensitivityOutOfRange(*sensitivity));
                }
            }
            InputConfig::Button { pin, .. } => check_pin(*pin)?,
            InputConfig::Matrix { row_pins, col_pins } => {
                if row_pins.is_empty() || col_pins.is_empty() {
                    return Err(EncodeError::EmptyMatrix);
                }
                if row_pins.len() * col_pins.len() > MAX_MATRIX_CELLS {
                    return Err(EncodeError::MatrixTooLarge {
                        rows: row_pins.len(),
                        cols: col_pins.len(),
                    });
                }
                let mut seen = HashSet::new();
                for &pin in row_pins.iter().chain(col_pins.iter()) {
                    check_pin(pin)?;
                    if !seen.insert(pin) {
                        return Err(EncodeError::DuplicatePin(pin));
                    }
                }
            }
            InputConfig::Bldc {
                pin, voltage_limit, ..
            } => {
                check_pin(*pin)?;
                check_percent("voltage_limit", *voltage_limit)?;
            }
        }
        Ok(())
    }
}

impl HapticProfile {
    /// Checks percentages and that every range references existing detents.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), EncodeError> {
        check_pin(self.pin)?;
        check_percent("snap_point", self.snap_point)?;
        check_count("detents", self.detents.len())?;
        check_count("ranges", self.ranges.len())?;

        for detent in &self.detents {
            check_percent("detent position", detent.position)?;
        }

        let num_detents = self.detents.len();
        for (range, r) in self.ranges.iter().enumerate() {
            for index in [r.start_detent, r.end_detent] {
                if index as usize >= num_detents {
                    return Err(EncodeError::DetentOutOfRange {
                        range,
                        index,
                        num_detents,
                    });
                }
            }
            if r.end_detent < r.start_detent {
                return Err(EncodeError::ReversedRange {
                    range,
                    start: r.start_detent,
                    end: r.end_detent,
                });
            }
        }
        Ok(())
    }
}

impl ConfigurePart {
    /// Checks the part index and the carried input.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.total_parts == 0 || self.part_number >= self.total_parts {
            return Err(EncodeError::InvalidPart {
                part_number: self.part_number,
                total_parts: self.total_parts,
            });
        }
        self.input.validate()
    }
}

/// Validate and serialize a message into a frame payload
///
/// # Arguments
///
/// * `message` - Message to encode
///
/// # Returns
///
/// * `Result<Vec<u8>, EncodeError>` - Type code followed by the little-endian fields
///
/// # Errors
///
/// Returns [`EncodeError`] if the message violates a domain constraint.
///
/// # Examples
///
/// ```
/// use train_io_bridge::protocol::{encode_message, Message};
///
/// let bytes = encode_message(&Message::InputValue { pin: 3, value: 513 }).unwrap();
/// assert_eq!(bytes, vec![0x05, 0x03, 0x01, 0x02]);
/// ```
pub fn encode_message(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(16);
    out.push(message.type_code());

    match message {
        Message::IdentityRequest { request_id } => {
            out.extend_from_slice(&request_id.to_le_bytes());
        }
        Message::IdentityResponse(identity) => {
            out.extend_from_slice(&identity.request_id.to_le_bytes());
            out.push(identity.version);
            out.push(identity.device_id);
            out.extend_from_slice(&identity.config_id.to_le_bytes());
        }
        Message::Configure(part) => {
            part.validate()?;
            out.extend_from_slice(&part.config_id.to_le_bytes());
            out.push(part.total_parts);
            out.push(part.part_number);
            out.push(part.input.type_code());
            encode_input(&part.input, &mut out);
        }
        Message::ConfigurationStored { config_id } => {
            out.extend_from_slice(&config_id.to_le_bytes());
        }
        Message::ConfigurationError { config_id, reason } => {
            out.extend_from_slice(&config_id.to_le_bytes());
            out.push(reason.code());
        }
        Message::InputValue { pin, value } => {
            out.push(*pin);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Message::Heartbeat => {}
        Message::RetryCalibration { pin } => {
            check_pin(*pin)?;
            out.push(*pin);
        }
        Message::LoadBldcProfile(profile) => {
            profile.validate()?;
            out.push(profile.pin);
            out.push(profile.detents.len() as u8);
            out.push(profile.ranges.len() as u8);
            out.push(profile.snap_point);
            out.push(profile.endstop_strength);
            for detent in &profile.detents {
                out.push(detent.position);
                out.push(detent.strength);
            }
            for range in &profile.ranges {
                out.push(range.start_detent);
                out.push(range.end_detent);
                out.push(range.damping);
            }
        }
        Message::DeactivateBldcProfile { pin } => {
            check_pin(*pin)?;
            out.push(*pin);
        }
    }

    Ok(out)
}

/// Counts and pin lists were validated by the caller
fn encode_input(input: &InputConfig, out: &mut Vec<u8>) {
    match input {
        InputConfig::Analog { pin, sensitivity } => {
            out.push(*pin);
            out.push(*sensitivity);
        }
        InputConfig::Button { pin, debounce } => {
            out.push(*pin);
            out.push(*debounce);
        }
        InputConfig::Matrix { row_pins, col_pins } => {
            out.push(row_pins.len() as u8);
            out.push(col_pins.len() as u8);
            out.extend_from_slice(row_pins);
            out.extend_from_slice(col_pins);
        }
        InputConfig::Bldc {
            pin,
            pole_pairs,
            voltage_limit,
        } => {
            out.push(*pin);
            out.push(*pole_pairs);
            out.push(*voltage_limit);
        }
    }
}

/// Encode a message and wrap it in a COBS frame ready for the port
///
/// # Errors
///
/// Returns [`EncodeError`] if the message violates a domain constraint.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, EncodeError> {
    Ok(framing::encode(&encode_message(message)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> HapticProfile {
        HapticProfile {
            pin: 9,
            snap_point: 40,
            endstop_strength: 200,
            detents: vec![
                Detent { position: 0, strength: 180 },
                Detent { position: 50, strength: 90 },
                Detent { position: 100, strength: 180 },
            ],
            ranges: vec![DampingRange {
                start_detent: 0,
                end_detent: 1,
                damping: 60,
            }],
        }
    }

    #[test]
    fn test_encode_identity_request() {
        let bytes = encode_message(&Message::IdentityRequest { request_id: 0x0403_0201 }).unwrap();
        assert_eq!(bytes, vec![0x00, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_encode_heartbeat_is_type_only() {
        assert_eq!(encode_message(&Message::Heartbeat).unwrap(), vec![0x06]);
    }

    #[test]
    fn test_encode_negative_input_value() {
        let bytes = encode_message(&Message::InputValue { pin: 1, value: -2 }).unwrap();
        assert_eq!(bytes, vec![0x05, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_encode_analog_configure() {
        let message = Message::Configure(ConfigurePart {
            config_id: 7,
            total_parts: 2,
            part_number: 1,
            input: InputConfig::Analog { pin: 14, sensitivity: 5 },
        });
        let bytes = encode_message(&message).unwrap();
        assert_eq!(bytes, vec![0x02, 7, 0, 0, 0, 2, 1, INPUT_TYPE_ANALOG, 14, 5]);
    }

    #[test]
    fn test_encode_matrix_configure() {
        let message = Message::Configure(ConfigurePart {
            config_id: 1,
            total_parts: 1,
            part_number: 0,
            input: InputConfig::Matrix {
                row_pins: vec![2, 3],
                col_pins: vec![4, 5, 6],
            },
        });
        let bytes = encode_message(&message).unwrap();
        assert_eq!(&bytes[7..], &[INPUT_TYPE_MATRIX, 2, 3, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_encode_bldc_profile_layout() {
        let bytes = encode_message(&Message::LoadBldcProfile(profile())).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x0B, 9, 3, 1, 40, 200, // header
                0, 180, 50, 90, 100, 180, // detents
                0, 1, 60, // ranges
            ]
        );
    }

    #[test]
    fn test_reject_pin_out_of_range() {
        let result = encode_message(&Message::RetryCalibration { pin: 200 });
        assert_eq!(result, Err(EncodeError::PinOutOfRange(200)));
    }

    #[test]
    fn test_reject_sensitivity_out_of_range() {
        let input = InputConfig::Analog { pin: 1, sensitivity: 11 };
        assert_eq!(input.validate(), Err(EncodeError::SensitivityOutOfRange(11)));
    }

    #[test]
    fn test_reject_invalid_part_number() {
        let part = ConfigurePart {
            config_id: 1,
            total_parts: 2,
            part_number: 2,
            input: InputConfig::Button { pin: 1, debounce: 20 },
        };
        assert!(matches!(
            encode_message(&Message::Configure(part)),
            Err(EncodeError::InvalidPart { .. })
        ));
    }

    #[test]
    fn test_reject_matrix_duplicate_pin() {
        let input = InputConfig::Matrix {
            row_pins: vec![2, 3],
            col_pins: vec![3, 4],
        };
        assert_eq!(input.validate(), Err(EncodeError::DuplicatePin(3)));
    }

    #[test]
    fn test_reject_empty_and_oversized_matrix() {
        let empty = InputConfig::Matrix {
            row_pins: vec![],
            col_pins: vec![1],
        };
        assert_eq!(empty.validate(), Err(EncodeError::EmptyMatrix));

        let huge = InputConfig::Matrix {
            row_pins: (0..12).collect(),
            col_pins: (20..32).collect(),
        };
        assert!(matches!(huge.validate(), Err(EncodeError::MatrixTooLarge { .. })));
    }

    #[test]
    fn test_reject_detent_position_over_100() {
        let mut p = profile();
        p.detents[1].position = 101;
        assert!(matches!(
            p.validate(),
            Err(EncodeError::PercentOutOfRange { value: 101, .. })
        ));
    }

    #[test]
    fn test_reject_range_referencing_missing_detent() {
        let mut p = profile();
        p.ranges[0].end_detent = 3;
        assert_eq!(
            p.validate(),
            Err(EncodeError::DetentOutOfRange {
                range: 0,
                index: 3,
                num_detents: 3
            })
        );
    }

    #[test]
    fn test_reject_reversed_range() {
        let mut p = profile();
        p.ranges[0] = DampingRange {
            start_detent: 2,
            end_detent: 1,
            damping: 10,
        };
        assert!(matches!(p.validate(), Err(EncodeError::ReversedRange { .. })));
    }

    #[test]
    fn test_encode_frame_ends_with_delimiter() {
        let frame = encode_frame(&Message::Heartbeat).unwrap();
        assert_eq!(frame, vec![0x02, 0x06, 0x00]);
    }
}
