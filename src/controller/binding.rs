//! # Input Bindings
//!
//! Maps device pins to simulator endpoints.
//!
//! ## Button modes
//!
//! | Mode | Press | Release |
//! |------|-------|---------|
//! | simple | send `on_value` | send `off_value` |
//! | momentary | send `on_value`, then repeat it every interval | stop repeating, send `off_value` once |
//! | latching | toggle, send the new state's value | nothing |
//!
//! ## Levers
//!
//! Lever outputs interpolate linearly between `min_output` and `max_output`
//! over the calibrated travel and are rounded to two decimals, so sensor
//! noise below 0.5% of the output range does not produce new commands.

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;

/// Behaviour of a button binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    #[default]
    Simple,
    Momentary,
    Latching,
}

/// A button (or matrix cell) driving one simulator endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonBinding {
    /// Physical pin, or virtual pin of a matrix cell
    pub pin: u8,
    pub endpoint: String,
    #[serde(default)]
    pub mode: ButtonMode,
    #[serde(default = "default_on_value")]
    pub on_value: f64,
    #[serde(default)]
    pub off_value: f64,
    /// Momentary repeat period; falls back to the controller default
    #[serde(default)]
    pub repeat_interval_ms: Option<u64>,
}

fn default_on_value() -> f64 {
    1.0
}

impl ButtonBinding {
    /// Value sent for the given logical state
    #[must_use]
    pub fn value_for(&self, on: bool) -> f64 {
        if on {
            self.on_value
        } else {
            self.off_value
        }
    }
}

/// An analog lever driving one simulator endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverBinding {
    pub pin: u8,
    pub endpoint: String,
    pub calibration: Calibration,
    #[serde(default)]
    pub min_output: f64,
    #[serde(default = "default_max_output")]
    pub max_output: f64,
}

fn default_max_output() -> f64 {
    1.0
}

impl LeverBinding {
    /// Simulator value for a raw sample
    ///
    /// # Examples
    ///
    /// ```
    /// use train_io_bridge::calibration::Calibration;
    /// use train_io_bridge::controller::LeverBinding;
    ///
    /// let lever = LeverBinding {
    ///     pin: 14,
    ///     endpoint: "Throttle".to_string(),
    ///     calibration: Calibration {
    ///         min_value: 0,
    ///         max_value: 300,
    ///         max_hardware_value: 1023,
    ///         is_inverted: false,
    ///         has_rollover: false,
    ///     },
    ///     min_output: 0.0,
    ///     max_output: 1.0,
    /// };
    /// assert_eq!(lever.output(100), 0.33);
    /// ```
    #[must_use]
    pub fn output(&self, raw: i16) -> f64 {
        let total = self.calibration.total_travel();
        if total <= 0 {
            return self.min_output;
        }

        let position = self.calibration.normalize(i32::from(raw));
        let fraction = f64::from(position) / f64::from(total);
        round_output(self.min_output + fraction * (self.max_output - self.min_output))
    }
}

/// Round to two decimal places
#[must_use]
pub fn round_output(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// All bindings of one profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSet {
    #[serde(default)]
    pub buttons: Vec<ButtonBinding>,
    #[serde(default)]
    pub levers: Vec<LeverBinding>,
}

impl BindingSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty() && self.levers.is_empty()
    }
}
