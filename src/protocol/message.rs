//! # Protocol Constants and Types
//!
//! Core message definitions exchanged with the hardware.

use serde::{Deserialize, Serialize};

/// Host asks the device to identify itself
pub const MSG_IDENTITY_REQUEST: u8 = 0x00;

/// Device identity reply
pub const MSG_IDENTITY_RESPONSE: u8 = 0x01;

/// One part of a device configuration
pub const MSG_CONFIGURE: u8 = 0x02;

/// Device stored a complete configuration
pub const MSG_CONFIGURATION_STORED: u8 = 0x03;

/// Device rejected a configuration
pub const MSG_CONFIGURATION_ERROR: u8 = 0x04;

/// Raw input reading from the device
pub const MSG_INPUT_VALUE: u8 = 0x05;

/// Liveness beacon, sent in both directions
pub const MSG_HEARTBEAT: u8 = 0x06;

/// Ask the device to re-run motor calibration on a pin
pub const MSG_RETRY_CALIBRATION: u8 = 0x08;

/// Load a haptic profile onto a BLDC lever
pub const MSG_LOAD_BLDC_PROFILE: u8 = 0x0B;

/// Unload the haptic profile from a BLDC lever
pub const MSG_DEACTIVATE_BLDC_PROFILE: u8 = 0x0C;

/// Configure input type codes
pub const INPUT_TYPE_ANALOG: u8 = 0;
pub const INPUT_TYPE_BUTTON: u8 = 1;
pub const INPUT_TYPE_MATRIX: u8 = 2;
pub const INPUT_TYPE_BLDC: u8 = 3;

/// Highest physical pin number
pub const MAX_PHYSICAL_PIN: u8 = 127;

/// First virtual pin; matrix cells are numbered from here
pub const VIRTUAL_PIN_BASE: u8 = 128;

/// Maximum number of cells a single matrix can report
pub const MAX_MATRIX_CELLS: usize = 128;

/// Highest analog sensitivity level
pub const MAX_SENSITIVITY: u8 = 10;

/// Largest value of any percentage field
pub const MAX_PERCENT: u8 = 100;

/// Identity reported by a device during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Echo of the request that triggered this response
    pub request_id: u32,

    /// Firmware protocol version
    pub version: u8,

    /// Board identifier
    pub device_id: u8,

    /// Configuration currently stored on the device (0 = none)
    pub config_id: u32,
}

/// Per-input configuration carried by a `Configure` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Potentiometer or hall sensor on an ADC pin
    Analog { pin: u8, sensitivity: u8 },

    /// Single debounced button
    Button { pin: u8, debounce: u8 },

    /// Scanned button matrix; cells report as virtual pins
    Matrix { row_pins: Vec<u8>, col_pins: Vec<u8> },

    /// Brushless motor lever with haptic feedback
    Bldc {
        pin: u8,
        pole_pairs: u8,
        /// Motor voltage limit as a percentage of supply
        voltage_limit: u8,
    },
}

impl InputConfig {
    /// Wire code for this input type
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            InputConfig::Analog { .. } => INPUT_TYPE_ANALOG,
            InputConfig::Button { .. } => INPUT_TYPE_BUTTON,
            InputConfig::Matrix { .. } => INPUT_TYPE_MATRIX,
            InputConfig::Bldc { .. } => INPUT_TYPE_BLDC,
        }
    }
}

/// One part of a multi-part configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurePart {
    pub config_id: u32,
    pub total_parts: u8,
    /// Zero-based index of this part
    pub part_number: u8,
    pub input: InputConfig,
}

/// A haptic notch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detent {
    /// Position along the lever travel, 0-100
    pub position: u8,
    /// Holding strength, 0-255
    pub strength: u8,
}

/// Damped region between two detents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DampingRange {
    /// Index into the profile's detents
    pub start_detent: u8,
    /// Index into the profile's detents, not before `start_detent`
    pub end_detent: u8,
    pub damping: u8,
}

/// Haptic behaviour for one BLDC lever
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HapticProfile {
    pub pin: u8,
    /// Distance (percent of detent spacing) at which a detent captures the lever
    pub snap_point: u8,
    pub endstop_strength: u8,
    #[serde(default)]
    pub detents: Vec<Detent>,
    #[serde(default)]
    pub ranges: Vec<DampingRange>,
}

/// Why a device refused a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorReason {
    /// A parameter was outside its allowed range
    InvalidRange,
    /// A pin, part or detent index does not exist
    IndexOutOfBounds,
    /// Unrecognized code, kept as sent by the device
    Other(u8),
}

impl ConfigErrorReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => ConfigErrorReason::InvalidRange,
            0x02 => ConfigErrorReason::IndexOutOfBounds,
            other => ConfigErrorReason::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ConfigErrorReason::InvalidRange => 0x01,
            ConfigErrorReason::IndexOutOfBounds => 0x02,
            ConfigErrorReason::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ConfigErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigErrorReason::InvalidRange => write!(f, "parameter out of range"),
            ConfigErrorReason::IndexOutOfBounds => write!(f, "index out of bounds"),
            ConfigErrorReason::Other(code) => write!(f, "device error code 0x{:02X}", code),
        }
    }
}

/// Every message of the device protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    IdentityRequest { request_id: u32 },
    IdentityResponse(Identity),
    Configure(ConfigurePart),
    ConfigurationStored { config_id: u32 },
    ConfigurationError { config_id: u32, reason: ConfigErrorReason },
    InputValue { pin: u8, value: i16 },
    Heartbeat,
    RetryCalibration { pin: u8 },
    LoadBldcProfile(HapticProfile),
    DeactivateBldcProfile { pin: u8 },
}

impl Message {
    /// Wire type code (first payload byte)
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Message::IdentityRequest { .. } => MSG_IDENTITY_REQUEST,
            Message::IdentityResponse(_) => MSG_IDENTITY_RESPONSE,
            Message::Configure(_) => MSG_CONFIGURE,
            Message::ConfigurationStored { .. } => MSG_CONFIGURATION_STORED,
            Message::ConfigurationError { .. } => MSG_CONFIGURATION_ERROR,
            Message::InputValue { .. } => MSG_INPUT_VALUE,
            Message::Heartbeat => MSG_HEARTBEAT,
            Message::RetryCalibration { .. } => MSG_RETRY_CALIBRATION,
            Message::LoadBldcProfile(_) => MSG_LOAD_BLDC_PROFILE,
            Message::DeactivateBldcProfile { .. } => MSG_DEACTIVATE_BLDC_PROFILE,
        }
    }

    /// Short name for log lines
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Message::IdentityRequest { .. } => "IdentityRequest",
            Message::IdentityResponse(_) => "IdentityResponse",
            Message::Configure(_) => "Configure",
            Message::ConfigurationStored { .. } => "ConfigurationStored",
            Message::ConfigurationError { .. } => "ConfigurationError",
            Message::InputValue { .. } => "InputValue",
            Message::Heartbeat => "Heartbeat",
            Message::RetryCalibration { .. } => "RetryCalibration",
            Message::LoadBldcProfile(_) => "LoadBLDCProfile",
            Message::DeactivateBldcProfile { .. } => "DeactivateBLDCProfile",
        }
    }
}

/// Virtual pin reported for a matrix cell
///
/// Returns `None` if the cell lies outside the virtual pin range.
///
/// # Examples
///
/// ```
/// use train_io_bridge::protocol::virtual_pin;
///
/// assert_eq!(virtual_pin(0, 0, 4), Some(128));
/// assert_eq!(virtual_pin(2, 1, 4), Some(137));
/// assert_eq!(virtual_pin(40, 0, 4), None);
/// ```
#[must_use]
pub fn virtual_pin(row: u8, col: u8, num_col: u8) -> Option<u8> {
    let cell = row as usize * num_col as usize + col as usize;
    if col >= num_col || cell >= MAX_MATRIX_CELLS {
        return None;
    }
    Some(VIRTUAL_PIN_BASE + cell as u8)
}

/// True for pins outside the physical range, i.e. matrix cells
#[must_use]
pub fn is_virtual_pin(pin: u8) -> bool {
    pin >= VIRTUAL_PIN_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        assert_eq!(MSG_IDENTITY_RESPONSE, 0x01);
        assert_eq!(MSG_CONFIGURE, 0x02);
        assert_eq!(MSG_INPUT_VALUE, 0x05);
        assert_eq!(MSG_HEARTBEAT, 0x06);
        assert_eq!(MSG_RETRY_CALIBRATION, 0x08);
        assert_eq!(MSG_LOAD_BLDC_PROFILE, 0x0B);
        assert_eq!(MSG_DEACTIVATE_BLDC_PROFILE, 0x0C);
    }

    #[test]
    fn test_message_type_code_matches_constant() {
        assert_eq!(Message::Heartbeat.type_code(), MSG_HEARTBEAT);
        assert_eq!(Message::InputValue { pin: 1, value: 2 }.type_code(), MSG_INPUT_VALUE);
        assert_eq!(Message::DeactivateBldcProfile { pin: 3 }.type_code(), 0x0C);
    }

    #[test]
    fn test_config_error_reason_codes() {
        assert_eq!(ConfigErrorReason::from_code(0x01), ConfigErrorReason::InvalidRange);
        assert_eq!(ConfigErrorReason::from_code(0x02), ConfigErrorReason::IndexOutOfBounds);
        assert_eq!(ConfigErrorReason::from_code(0x7E), ConfigErrorReason::Other(0x7E));
        assert_eq!(ConfigErrorReason::Other(0x7E).code(), 0x7E);
    }

    #[test]
    fn test_virtual_pin_layout() {
        assert_eq!(virtual_pin(0, 3, 4), Some(131));
        assert_eq!(virtual_pin(1, 0, 4), Some(132));
        // Column outside the matrix
        assert_eq!(virtual_pin(0, 4, 4), None);
        // Last representable cell
        assert_eq!(virtual_pin(15, 7, 8), Some(255));
        assert_eq!(virtual_pin(16, 0, 8), None);
    }

    #[test]
    fn test_is_virtual_pin() {
        assert!(!is_virtual_pin(0));
        assert!(!is_virtual_pin(MAX_PHYSICAL_PIN));
        assert!(is_virtual_pin(VIRTUAL_PIN_BASE));
        assert!(is_virtual_pin(255));
    }

    #[test]
    fn test_input_config_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            inputs: Vec<InputConfig>,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
[[inputs]]
type = "analog"
pin = 14
sensitivity = 5

[[inputs]]
type = "matrix"
row_pins = [2, 3]
col_pins = [4, 5, 6]
"#,
        )
        .unwrap();

        assert_eq!(parsed.inputs[0], InputConfig::Analog { pin: 14, sensitivity: 5 });
        assert_eq!(parsed.inputs[1].type_code(), INPUT_TYPE_MATRIX);
    }
}
