//! # Profiles
//!
//! A profile is everything the bridge persists for one train: the board's
//! input configuration, the haptic profiles of its motor levers, and the
//! bindings that turn inputs into simulator commands.
//!
//! ```toml
//! name = "Class 66"
//!
//! [device]
//! config_id = 66
//!
//! [[device.inputs]]
//! type = "analog"
//! pin = 14
//! sensitivity = 4
//!
//! [[device.inputs]]
//! type = "button"
//! pin = 3
//! debounce = 20
//!
//! [[buttons]]
//! pin = 3
//! endpoint = "Horn"
//! mode = "momentary"
//!
//! [[levers]]
//! pin = 14
//! endpoint = "Throttle"
//! calibration = { min_value = 12, max_value = 1001 }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::{BindingSet, ButtonBinding, ButtonMode, LeverBinding};
use crate::error::{BridgeError, Result};
use crate::protocol::HapticProfile;
use crate::session::DeviceConfiguration;

/// Persisted records of one train
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,

    /// Input configuration pushed to the board; absent for boards that are
    /// configured by other means
    #[serde(default)]
    pub device: Option<DeviceConfiguration>,

    #[serde(default)]
    pub haptics: Vec<HapticProfile>,

    #[serde(default)]
    pub buttons: Vec<ButtonBinding>,

    #[serde(default)]
    pub levers: Vec<LeverBinding>,
}

impl Profile {
    /// Load and validate a profile from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the profile file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Any record is invalid (see [`Profile::validate`])
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use train_io_bridge::profile::Profile;
    ///
    /// let profile = Profile::load("profiles/class66.toml")?;
    /// println!("{} bindings", profile.bindings().buttons.len());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let profile = Self::from_toml(&contents)?;
        debug!(
            "Loaded profile '{}' from {}: {} buttons, {} levers, {} haptic profiles",
            profile.name,
            path.display(),
            profile.buttons.len(),
            profile.levers.len(),
            profile.haptics.len()
        );
        Ok(profile)
    }

    /// Parse and validate a profile from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the text is not a valid profile
    /// document, or the error of [`Profile::validate`].
    pub fn from_toml(contents: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(contents)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check every record before anything is sent to a board
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Encode`] for an invalid device configuration or haptic profile
    /// - [`BridgeError::Calibration`] for a lever with an unusable calibration
    /// - [`BridgeError::Profile`] for duplicate pins, empty endpoints or a zero repeat interval
    pub fn validate(&self) -> Result<()> {
        if let Some(device) = &self.device {
            device.messages()?;
        }

        let mut haptic_pins = HashSet::new();
        for haptic in &self.haptics {
            haptic.validate()?;
            if !haptic_pins.insert(haptic.pin) {
                return Err(BridgeError::Profile(format!(
                    "pin {} has more than one haptic profile",
                    haptic.pin
                )));
            }
        }

        let mut bound_pins = HashSet::new();
        for button in &self.buttons {
            check_endpoint(button.pin, &button.endpoint)?;
            if button.mode == ButtonMode::Momentary && button.repeat_interval_ms == Some(0) {
                return Err(BridgeError::Profile(format!(
                    "button on pin {} has a zero repeat interval",
                    button.pin
                )));
            }
            check_unbound(&mut bound_pins, button.pin)?;
        }

        for lever in &self.levers {
            check_endpoint(lever.pin, &lever.endpoint)?;
            lever.calibration.validate()?;
            if !lever.min_output.is_finite() || !lever.max_output.is_finite() {
                return Err(BridgeError::Profile(format!(
                    "lever on pin {} has a non-finite output range",
                    lever.pin
                )));
            }
            check_unbound(&mut bound_pins, lever.pin)?;
        }

        Ok(())
    }

    /// Bindings to hand to a controller
    #[must_use]
    pub fn bindings(&self) -> BindingSet {
        BindingSet {
            buttons: self.buttons.clone(),
            levers: self.levers.clone(),
        }
    }
}

fn check_endpoint(pin: u8, endpoint: &str) -> Result<()> {
    if endpoint.trim().is_empty() {
        return Err(BridgeError::Profile(format!("binding on pin {} has no endpoint", pin)));
    }
    Ok(())
}

fn check_unbound(bound: &mut HashSet<u8>, pin: u8) -> Result<()> {
    if !bound.insert(pin) {
        return Err(BridgeError::Profile(format!("pin {} is bound more than once", pin)));
    }
    Ok(())
}
