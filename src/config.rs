//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! ```toml
//! [serial]
//! baud_rate = 115200
//!
//! [session]
//! heartbeat_interval_ms = 500
//!
//! [command_log]
//! log_dir = "./logs/commands"
//!
//! [[ports]]
//! path = "/dev/ttyACM0"
//! profile = "profiles/class66.toml"
//! ```

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::session::SessionSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub command_log: CommandLogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Device session timing
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    #[serde(default = "default_discovery_retries")]
    pub discovery_retries: u32,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_timeout_factor")]
    pub heartbeat_timeout_factor: u32,

    #[serde(default = "default_configure_timeout_ms")]
    pub configure_timeout_ms: u64,

    #[serde(default = "default_configure_retries")]
    pub configure_retries: u32,
}

/// Input controller configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "default_repeat_interval_ms")]
    pub default_repeat_interval_ms: u64,
}

/// Simulator command log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandLogConfig {
    #[serde(default = "default_command_log_enabled")]
    pub enabled: bool,

    #[serde(default = "default_command_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory of the daily rolling log file; empty disables it
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

/// One board and the profile it runs
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub path: String,

    /// Profile file; without one the board only reports values
    #[serde(default)]
    pub profile: Option<String>,
}

// Default value functions
fn default_baud_rate() -> u32 { crate::serial::DEFAULT_BAUD_RATE }
fn default_reconnect_interval_ms() -> u64 { 2000 }

fn default_settle_delay_ms() -> u64 { 150 }
fn default_discovery_timeout_ms() -> u64 { 1000 }
fn default_discovery_retries() -> u32 { 3 }
fn default_heartbeat_interval_ms() -> u64 { 500 }
fn default_heartbeat_timeout_factor() -> u32 { 3 }
fn default_configure_timeout_ms() -> u64 { 2000 }
fn default_configure_retries() -> u32 { 2 }

fn default_repeat_interval_ms() -> u64 { crate::controller::DEFAULT_REPEAT_INTERVAL_MS }

fn default_command_log_enabled() -> bool { false }
fn default_command_log_dir() -> String { "./logs/commands".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "./logs".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            discovery_retries: default_discovery_retries(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_factor: default_heartbeat_timeout_factor(),
            configure_timeout_ms: default_configure_timeout_ms(),
            configure_retries: default_configure_retries(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_repeat_interval_ms: default_repeat_interval_ms(),
        }
    }
}

impl Default for CommandLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_command_log_enabled(),
            log_dir: default_command_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: default_log_dir(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use train_io_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate baud rate
        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        check_range("reconnect_interval_ms", self.serial.reconnect_interval_ms, 1, 60000)?;

        // Validate session timing
        let session = &self.session;
        check_range("settle_delay_ms", session.settle_delay_ms, 0, 5000)?;
        check_range("discovery_timeout_ms", session.discovery_timeout_ms, 1, 10000)?;
        check_range("discovery_retries", u64::from(session.discovery_retries), 1, 100)?;
        check_range("heartbeat_interval_ms", session.heartbeat_interval_ms, 10, 60000)?;
        check_range("heartbeat_timeout_factor", u64::from(session.heartbeat_timeout_factor), 2, 20)?;
        check_range("configure_timeout_ms", session.configure_timeout_ms, 1, 60000)?;
        check_range("configure_retries", u64::from(session.configure_retries), 0, 10)?;

        check_range(
            "default_repeat_interval_ms",
            self.controller.default_repeat_interval_ms,
            10,
            10000,
        )?;

        // Validate command log configuration
        if self.command_log.enabled {
            if self.command_log.log_dir.is_empty() {
                return Err(invalid("command_log log_dir cannot be empty when enabled"));
            }
            if self.command_log.max_records_per_file == 0 {
                return Err(invalid("max_records_per_file must be greater than 0"));
            }
            if self.command_log.max_files_to_keep == 0 {
                return Err(invalid("max_files_to_keep must be greater than 0"));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        // Validate ports: one session per port
        for (index, port) in self.ports.iter().enumerate() {
            if port.path.is_empty() {
                return Err(invalid(format!("ports[{}] path cannot be empty", index)));
            }
            if self.ports[..index].iter().any(|other| other.path == port.path) {
                return Err(invalid(format!("port {} is listed more than once", port.path)));
            }
        }

        Ok(())
    }

    /// Session parameters for every port
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            settle_delay: Duration::from_millis(self.session.settle_delay_ms),
            discovery_timeout: Duration::from_millis(self.session.discovery_timeout_ms),
            discovery_retries: self.session.discovery_retries,
            heartbeat_interval: Duration::from_millis(self.session.heartbeat_interval_ms),
            heartbeat_timeout_factor: self.session.heartbeat_timeout_factor,
            configure_timeout: Duration::from_millis(self.session.configure_timeout_ms),
            configure_retries: self.session.configure_retries,
            reconnect_interval: Duration::from_millis(self.serial.reconnect_interval_ms),
        }
    }

    /// Repeat period of momentary buttons without their own interval
    #[must_use]
    pub fn default_repeat_interval(&self) -> Duration {
        Duration::from_millis(self.controller.default_repeat_interval_ms)
    }
}
