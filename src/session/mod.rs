//! # Device Session Module
//!
//! One session per serial port. The session task owns the port exclusively:
//! all reads and writes go through it, so frames from different writers never
//! interleave. Callers talk to it through a cloneable [`SessionHandle`] and
//! observe it through broadcast [`SessionEvent`]s.
//!
//! This module handles:
//! - Discovery (settle, flush, identity request with retries)
//! - Configuration push with acknowledgement tracking and resends
//! - Heartbeats in both directions and connection-loss detection
//! - Reconnecting and reapplying the last configuration and haptic profiles
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use train_io_bridge::serial::SerialPortOpener;
//! use train_io_bridge::session::{spawn_session, SessionSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let opener = Arc::new(SerialPortOpener::default());
//!     let (session, task) = spawn_session("/dev/ttyACM0", opener, SessionSettings::default());
//!     let mut events = session.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     session.close().await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod discovery;
pub mod state;

pub use discovery::{discover, DiscoveryError};
pub use state::{ConfigureFailure, InFlightConfig, Outcome, SessionState, Stimulus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{BridgeError, Result};
use crate::protocol::{encode_frame, ConfigurePart, EncodeError, HapticProfile, Identity, InputConfig, Message};
use crate::serial::{PortOpener, SerialPortIO};

/// Bytes requested from the port per read
pub(crate) const READ_BUFFER_SIZE: usize = 256;

const COMMAND_QUEUE_SIZE: usize = 32;
const EVENT_QUEUE_SIZE: usize = 256;

/// Timing and retry parameters of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Wait after opening the port before talking to the board
    pub settle_delay: Duration,
    /// Read timeout of one identity request
    pub discovery_timeout: Duration,
    /// Identity requests sent before giving up
    pub discovery_retries: u32,
    pub heartbeat_interval: Duration,
    /// Silence of `heartbeat_interval * factor` is a lost connection
    pub heartbeat_timeout_factor: u32,
    pub configure_timeout: Duration,
    /// Resends of an unacknowledged configuration
    pub configure_retries: u32,
    /// Wait before reopening a failed port
    pub reconnect_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(150),
            discovery_timeout: Duration::from_millis(1000),
            discovery_retries: 3,
            heartbeat_interval: Duration::from_millis(500),
            heartbeat_timeout_factor: 3,
            configure_timeout: Duration::from_millis(2000),
            configure_retries: 2,
            reconnect_interval: Duration::from_millis(2000),
        }
    }
}

impl SessionSettings {
    /// Silence after which the device counts as lost
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_timeout_factor
    }
}

/// Full input configuration of one board
///
/// The `config_id` is the persisted identifier of the stored record. It is
/// reused on every push so the board's stored state stays addressable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub config_id: u32,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

impl DeviceConfiguration {
    /// One validated `Configure` message per input, numbered from zero
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if there are no inputs, more than 255 inputs,
    /// or an input violates a domain constraint.
    pub fn messages(&self) -> std::result::Result<Vec<Message>, EncodeError> {
        if self.inputs.is_empty() {
            return Err(EncodeError::EmptyConfiguration);
        }
        let total_parts = u8::try_from(self.inputs.len()).map_err(|_| EncodeError::TooManyEntries {
            field: "inputs",
            count: self.inputs.len(),
        })?;

        self.inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let part = ConfigurePart {
                    config_id: self.config_id,
                    total_parts,
                    part_number: index as u8,
                    input: input.clone(),
                };
                part.validate()?;
                Ok(Message::Configure(part))
            })
            .collect()
    }
}

/// Notifications published by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Discovered { port: String, identity: Identity },
    DiscoveryFailed { port: String, attempts: u32 },
    ConfigurationApplied { port: String, config_id: u32 },
    ConfigurationFailed {
        port: String,
        config_id: u32,
        failure: ConfigureFailure,
    },
    InputValueUpdated { port: String, pin: u8, value: i16 },
    ConnectionLost { port: String },
    Closed { port: String },
}

/// Requests handled by the session task
#[derive(Debug)]
pub enum SessionCommand {
    Configure(DeviceConfiguration),
    LoadProfile(HapticProfile),
    UnloadProfile { pin: u8 },
    RetryCalibration { pin: u8 },
    Rediscover,
    InputValues(oneshot::Sender<HashMap<u8, i16>>),
    State(oneshot::Sender<SessionState>),
    Close,
}

/// Cloneable handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    port: String,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Path of the port this session owns
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Push `configuration` now, and again after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Encode`] if the configuration is invalid, or
    /// [`BridgeError::Closed`] if the session has stopped.
    pub async fn configure(&self, configuration: DeviceConfiguration) -> Result<()> {
        configuration.messages()?;
        self.send(SessionCommand::Configure(configuration)).await
    }

    /// Load a haptic profile; it is re-sent after every reconnect until
    /// unloaded.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Encode`] if the profile is invalid, or
    /// [`BridgeError::Closed`] if the session has stopped.
    pub async fn load_profile(&self, profile: HapticProfile) -> Result<()> {
        profile.validate()?;
        self.send(SessionCommand::LoadProfile(profile)).await
    }

    /// Deactivate the haptic profile of `pin`
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has stopped.
    pub async fn unload_profile(&self, pin: u8) -> Result<()> {
        self.send(SessionCommand::UnloadProfile { pin }).await
    }

    /// Ask the board to recalibrate the motor on `pin`
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has stopped.
    pub async fn retry_calibration(&self, pin: u8) -> Result<()> {
        self.send(SessionCommand::RetryCalibration { pin }).await
    }

    /// Run discovery again, e.g. after it failed
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has stopped.
    pub async fn rediscover(&self) -> Result<()> {
        self.send(SessionCommand::Rediscover).await
    }

    /// Last value reported for every pin since the device was discovered
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has stopped.
    pub async fn input_values(&self) -> Result<HashMap<u8, i16>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::InputValues(tx)).await?;
        rx.await.map_err(|_| BridgeError::Closed("session"))
    }

    /// Snapshot of the session state
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has stopped.
    pub async fn state(&self) -> Result<SessionState> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::State(tx)).await?;
        rx.await.map_err(|_| BridgeError::Closed("session"))
    }

    /// Stop the session and release the port
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the session has already stopped.
    pub async fn close(&self) -> Result<()> {
        self.send(SessionCommand::Close).await
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::Closed("session"))
    }
}

/// Start a session for the port at `path`
///
/// The port is opened through `opener` inside the task, and reopened the
/// same way after I/O errors.
pub fn spawn_session(
    path: impl Into<String>,
    opener: Arc<dyn PortOpener>,
    settings: SessionSettings,
) -> (SessionHandle, JoinHandle<()>) {
    let path = path.into();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let (event_tx, _) = broadcast::channel(EVENT_QUEUE_SIZE);

    let handle = SessionHandle {
        port: path.clone(),
        commands: command_tx,
        events: event_tx.clone(),
    };
    let actor = actor::SessionActor::new(path, opener, settings, command_rx, event_tx);
    let task = tokio::spawn(actor.run());

    (handle, task)
}

/// Encode, write and flush one message
///
/// # Errors
///
/// * [`BridgeError::Encode`] if the message fails validation; nothing is written
/// * [`BridgeError::Io`] if the port write or flush fails
pub(crate) async fn write_message(port: &mut dyn SerialPortIO, message: &Message) -> Result<()> {
    let frame = encode_frame(message)?;

    port.write_all(&frame).await?;
    port.flush().await?;
    trace!("Sent {} ({} bytes)", message.name(), frame.len());
    Ok(())
}
