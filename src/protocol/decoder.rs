//! # Message Decoder
//!
//! Decodes frame payloads into [`Message`]s. Every variant checks that the
//! payload length is exactly what its layout (and declared counts) require;
//! there are no partial parses.

use thiserror::Error;

use super::message::*;

/// A frame payload that is not a valid message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("unknown message type 0x{0:02X}")]
    UnknownType(u8),

    #[error("{message} payload is {actual} bytes, expected {expected}")]
    Length {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown input type {0}")]
    UnknownInputType(u8),
}

/// Little-endian field reader over a payload whose length was already checked
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let value = self.bytes[self.pos];
        self.pos += 1;
        value
    }

    fn u32(&mut self) -> u32 {
        let value = u32::from_le_bytes([
            self.bytes[self.pos],
            self.bytes[self.pos + 1],
            self.bytes[self.pos + 2],
            self.bytes[self.pos + 3],
        ]);
        self.pos += 4;
        value
    }

    fn i16(&mut self) -> i16 {
        let value = i16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
        self.pos += 2;
        value
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        slice
    }
}

fn expect_len(message: &'static str, body: &[u8], expected: usize) -> Result<(), DecodeError> {
    if body.len() != expected {
        return Err(DecodeError::Length {
            message,
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

/// Fixed configure header after the type code: config_id, total_parts, part_number, input_type
const CONFIGURE_HEADER_LEN: usize = 7;

/// Fixed haptic profile header after the type code
const BLDC_PROFILE_HEADER_LEN: usize = 5;

/// Decode a frame payload into a message
///
/// # Arguments
///
/// * `payload` - Decoded frame bytes, starting with the type code
///
/// # Returns
///
/// * `Result<Message, DecodeError>` - Decoded message, or why it was rejected
///
/// # Errors
///
/// Returns error if:
/// - Payload is empty
/// - Type code or input type is unknown
/// - Length differs from what the layout and declared counts require
///
/// # Examples
///
/// ```
/// use train_io_bridge::protocol::{decode_message, Message};
///
/// let message = decode_message(&[0x05, 0x03, 0x01, 0x02]).unwrap();
/// assert_eq!(message, Message::InputValue { pin: 3, value: 513 });
/// ```
pub fn decode_message(payload: &[u8]) -> Result<Message, DecodeError> {
    let Some((&type_code, body)) = payload.split_first() else {
        return Err(DecodeError::Empty);
    };
    let mut r = Reader::new(body);

    let message = match type_code {
        MSG_IDENTITY_REQUEST => {
            expect_len("IdentityRequest", body, 4)?;
            Message::IdentityRequest { request_id: r.u32() }
        }
        MSG_IDENTITY_RESPONSE => {
            expect_len("IdentityResponse", body, 10)?;
            Message::IdentityResponse(Identity {
                request_id: r.u32(),
                version: r.u8(),
                device_id: r.u8(),
                config_id: r.u32(),
            })
        }
        MSG_CONFIGURE => Message::Configure(decode_configure(body)?),
        MSG_CONFIGURATION_STORED => {
            expect_len("ConfigurationStored", body, 4)?;
            Message::ConfigurationStored { config_id: r.u32() }
        }
        MSG_CONFIGURATION_ERROR => {
            expect_len("ConfigurationError", body, 5)?;
            Message::ConfigurationError {
                config_id: r.u32(),
                reason: ConfigErrorReason::from_code(r.u8()),
            }
        }
        MSG_INPUT_VALUE => {
            expect_len("InputValue", body, 3)?;
            Message::InputValue {
                pin: r.u8(),
                value: r.i16(),
            }
        }
        MSG_HEARTBEAT => {
            expect_len("Heartbeat", body, 0)?;
            Message::Heartbeat
        }
        MSG_RETRY_CALIBRATION => {
            expect_len("RetryCalibration", body, 1)?;
            Message::RetryCalibration { pin: r.u8() }
        }
        MSG_LOAD_BLDC_PROFILE => Message::LoadBldcProfile(decode_bldc_profile(body)?),
        MSG_DEACTIVATE_BLDC_PROFILE => {
            expect_len("DeactivateBLDCProfile", body, 1)?;
            Message::DeactivateBldcProfile { pin: r.u8() }
        }
        other => return Err(DecodeError::UnknownType(other)),
    };

    Ok(message)
}

fn decode_configure(body: &[u8]) -> Result<ConfigurePart, DecodeError> {
    if body.len() < CONFIGURE_HEADER_LEN {
        return Err(DecodeError::Length {
            message: "Configure",
            expected: CONFIGURE_HEADER_LEN,
            actual: body.len(),
        });
    }

    let mut r = Reader::new(body);
    let config_id = r.u32();
    let total_parts = r.u8();
    let part_number = r.u8();
    let input_type = r.u8();
    let rest = &body[CONFIGURE_HEADER_LEN..];
    let mut r = Reader::new(rest);

    let input = match input_type {
        INPUT_TYPE_ANALOG => {
            expect_len("Configure(analog)", rest, 2)?;
            InputConfig::Analog {
                pin: r.u8(),
                sensitivity: r.u8(),
            }
        }
        INPUT_TYPE_BUTTON => {
            expect_len("Configure(button)", rest, 2)?;
            InputConfig::Button {
                pin: r.u8(),
                debounce: r.u8(),
            }
        }
        INPUT_TYPE_MATRIX => {
            if rest.len() < 2 {
                return Err(DecodeError::Length {
                    message: "Configure(matrix)",
                    expected: 2,
                    actual: rest.len(),
                });
            }
            let num_row = r.u8() as usize;
            let num_col = r.u8() as usize;
            expect_len("Configure(matrix)", rest, 2 + num_row + num_col)?;
            InputConfig::Matrix {
                row_pins: r.take(num_row).to_vec(),
                col_pins: r.take(num_col).to_vec(),
            }
        }
        INPUT_TYPE_BLDC => {
            expect_len("Configure(bldc)", rest, 3)?;
            InputConfig::Bldc {
                pin: r.u8(),
                pole_pairs: r.u8(),
                voltage_limit: r.u8(),
            }
        }
        other => return Err(DecodeError::UnknownInputType(other)),
    };

    Ok(ConfigurePart {
        config_id,
        total_parts,
        part_number,
        input,
    })
}

fn decode_bldc_profile(body: &[u8]) -> Result<HapticProfile, DecodeError> {
    if body.len() < BLDC_PROFILE_HEADER_LEN {
        return Err(DecodeError::Length {
            message: "LoadBLDCProfile",
            expected: BLDC_PROFILE_HEADER_LEN,
            actual: body.len(),
        });
    }

    let mut r = Reader::new(body);
    let pin = r.u8();
    let num_detents = r.u8() as usize;
    let num_ranges = r.u8() as usize;
    let snap_point = r.u8();
    let endstop_strength = r.u8();

    expect_len(
        "LoadBLDCProfile",
        body,
        BLDC_PROFILE_HEADER_LEN + num_detents * 2 + num_ranges * 3,
    )?;

    let detents = (0..num_detents)
        .map(|_| Detent {
            position: r.u8(),
            strength: r.u8(),
        })
        .collect();
    let ranges = (0..num_ranges)
        .map(|_| DampingRange {
            start_detent: r.u8(),
            end_detent: r.u8(),
            damping: r.u8(),
        })
        .collect();

    Ok(HapticProfile {
        pin,
        snap_point,
        endstop_strength,
        detents,
        ranges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder::encode_message;
    use proptest::prelude::*;

    #[test]
    fn test_decode_empty_payload() {
        assert_eq!(decode_message(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(decode_message(&[0x07]), Err(DecodeError::UnknownType(0x07)));
        assert_eq!(decode_message(&[0xEE, 1, 2]), Err(DecodeError::UnknownType(0xEE)));
    }

    #[test]
    fn test_decode_identity_response() {
        let payload = [0x01, 0x2A, 0, 0, 0, 3, 9, 0x10, 0x27, 0, 0];
        let message = decode_message(&payload).unwrap();
        assert_eq!(
            message,
            Message::IdentityResponse(Identity {
                request_id: 42,
                version: 3,
                device_id: 9,
                config_id: 10_000,
            })
        );
    }

    #[test]
    fn test_decode_identity_response_wrong_length() {
        let result = decode_message(&[0x01, 0x2A, 0, 0, 0, 3]);
        assert_eq!(
            result,
            Err(DecodeError::Length {
                message: "IdentityResponse",
                expected: 10,
                actual: 5
            })
        );
    }

    #[test]
    fn test_decode_input_value_trailing_byte() {
        assert!(matches!(
            decode_message(&[0x05, 1, 0, 0, 0]),
            Err(DecodeError::Length { .. })
        ));
    }

    #[test]
    fn test_decode_heartbeat_with_payload_is_rejected() {
        assert!(decode_message(&[0x06, 0x00]).is_err());
        assert_eq!(decode_message(&[0x06]).unwrap(), Message::Heartbeat);
    }

    #[test]
    fn test_decode_matrix_count_mismatch() {
        // Declares 2 rows + 2 cols but carries 3 pins
        let payload = [0x02, 1, 0, 0, 0, 1, 0, INPUT_TYPE_MATRIX, 2, 2, 4, 5, 6];
        assert!(matches!(
            decode_message(&payload),
            Err(DecodeError::Length { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_input_type() {
        let payload = [0x02, 1, 0, 0, 0, 1, 0, 9, 1, 1];
        assert_eq!(decode_message(&payload), Err(DecodeError::UnknownInputType(9)));
    }

    #[test]
    fn test_decode_bldc_profile_count_mismatch() {
        // One detent declared, two present
        let payload = [0x0B, 4, 1, 0, 50, 100, 10, 20, 30, 40];
        assert!(matches!(
            decode_message(&payload),
            Err(DecodeError::Length { .. })
        ));
    }

    #[test]
    fn test_decode_configuration_error_reason() {
        let message = decode_message(&[0x04, 5, 0, 0, 0, 0x02]).unwrap();
        assert_eq!(
            message,
            Message::ConfigurationError {
                config_id: 5,
                reason: ConfigErrorReason::IndexOutOfBounds
            }
        );
    }

    fn arb_input() -> impl Strategy<Value = InputConfig> {
        prop_oneof![
            (0u8..=127, 0u8..=10).prop_map(|(pin, sensitivity)| InputConfig::Analog { pin, sensitivity }),
            (0u8..=127, any::<u8>()).prop_map(|(pin, debounce)| InputConfig::Button { pin, debounce }),
            (1usize..=8, 1usize..=8).prop_map(|(rows, cols)| InputConfig::Matrix {
                row_pins: (0..rows as u8).collect(),
                col_pins: (64..64 + cols as u8).collect(),
            }),
            (0u8..=127, any::<u8>(), 0u8..=100).prop_map(|(pin, pole_pairs, voltage_limit)| {
                InputConfig::Bldc { pin, pole_pairs, voltage_limit }
            }),
        ]
    }

    fn arb_profile() -> impl Strategy<Value = HapticProfile> {
        (
            0u8..=127,
            0u8..=100,
            any::<u8>(),
            proptest::collection::vec((0u8..=100, any::<u8>()), 1..12),
        )
            .prop_flat_map(|(pin, snap_point, endstop_strength, detents)| {
                let n = detents.len() as u8;
                let ranges = proptest::collection::vec((0..n, 0..n, any::<u8>()), 0..6);
                (Just((pin, snap_point, endstop_strength, detents)), ranges)
            })
            .prop_map(|((pin, snap_point, endstop_strength, detents), ranges)| HapticProfile {
                pin,
                snap_point,
                endstop_strength,
                detents: detents
                    .into_iter()
                    .map(|(position, strength)| Detent { position, strength })
                    .collect(),
                ranges: ranges
                    .into_iter()
                    .map(|(a, b, damping)| DampingRange {
                        start_detent: a.min(b),
                        end_detent: a.max(b),
                        damping,
                    })
                    .collect(),
            })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            any::<u32>().prop_map(|request_id| Message::IdentityRequest { request_id }),
            (any::<u32>(), any::<u8>(), any::<u8>(), any::<u32>()).prop_map(|(request_id, version, device_id, config_id)| {
                Message::IdentityResponse(Identity { request_id, version, device_id, config_id })
            }),
            (any::<u32>(), 1u8..=32, arb_input()).prop_flat_map(|(config_id, total_parts, input)| {
                (0..total_parts).prop_map(move |part_number| {
                    Message::Configure(ConfigurePart {
                        config_id,
                        total_parts,
                        part_number,
                        input: input.clone(),
                    })
                })
            }),
            any::<u32>().prop_map(|config_id| Message::ConfigurationStored { config_id }),
            (any::<u32>(), any::<u8>()).prop_map(|(config_id, code)| Message::ConfigurationError {
                config_id,
                reason: ConfigErrorReason::from_code(code),
            }),
            (any::<u8>(), any::<i16>()).prop_map(|(pin, value)| Message::InputValue { pin, value }),
            Just(Message::Heartbeat),
            (0u8..=127).prop_map(|pin| Message::RetryCalibration { pin }),
            arb_profile().prop_map(Message::LoadBldcProfile),
            (0u8..=127).prop_map(|pin| Message::DeactivateBldcProfile { pin }),
        ]
    }

    proptest! {
        #[test]
        fn prop_message_round_trip(message in arb_message()) {
            let bytes = encode_message(&message).unwrap();
            prop_assert_eq!(decode_message(&bytes), Ok(message));
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_message(&bytes);
        }
    }
}
