//! # Controller Module
//!
//! Turns input values reported by a device session into simulator commands.
//!
//! This module handles:
//! - Button bindings in simple, momentary and latching mode
//! - Calibrated lever bindings
//! - Repeat timers for momentary buttons
//! - Reloading bindings atomically when the active profile changes
//!
//! One controller task owns the binding table; everything else submits
//! events through a [`ControllerHandle`].

pub mod actor;
pub mod binding;
pub mod table;

pub use actor::follow_session;
pub use binding::{BindingSet, ButtonBinding, ButtonMode, LeverBinding};
pub use table::{BindingTable, Effect};

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::simulator::SimulatorCommand;

const COMMAND_QUEUE_SIZE: usize = 64;

/// Default repeat period of momentary buttons
pub const DEFAULT_REPEAT_INTERVAL_MS: u64 = 200;

/// Notifications published by controllers and the command dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerNotification {
    BindingsReloaded { buttons: usize, levers: usize },
    CommandFailed { endpoint: String, error: String },
}

/// Events handled by the controller task
#[derive(Debug)]
pub enum ControllerCommand {
    Input { pin: u8, value: i16 },
    RepeatTick { pin: u8, generation: u64 },
    Reload(BindingSet),
    Reset,
    Shutdown,
}

/// Cloneable handle to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    notifications: broadcast::Sender<ControllerNotification>,
}

impl ControllerHandle {
    /// Submit a raw input value
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the controller has stopped.
    pub async fn input(&self, pin: u8, value: i16) -> Result<()> {
        self.send(ControllerCommand::Input { pin, value }).await
    }

    /// Replace the bindings, cancelling every live repeat
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the controller has stopped.
    pub async fn reload(&self, bindings: BindingSet) -> Result<()> {
        self.send(ControllerCommand::Reload(bindings)).await
    }

    /// Cancel timers and forget runtime state, keeping the bindings
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the controller has stopped.
    pub async fn reset(&self) -> Result<()> {
        self.send(ControllerCommand::Reset).await
    }

    /// Stop the controller and every timer it owns
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the controller has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ControllerCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerNotification> {
        self.notifications.subscribe()
    }

    async fn send(&self, command: ControllerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::Closed("controller"))
    }
}

/// Start a controller with `bindings`
///
/// Commands are written to `output`; `notifications` is shared with the
/// dispatcher so subscribers see reloads and delivery failures together.
pub fn spawn_controller(
    bindings: BindingSet,
    default_repeat_interval: Duration,
    output: mpsc::Sender<SimulatorCommand>,
    notifications: broadcast::Sender<ControllerNotification>,
) -> (ControllerHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let handle = ControllerHandle {
        commands: command_tx.clone(),
        notifications: notifications.clone(),
    };

    let actor = actor::ControllerActor::new(
        BindingTable::new(default_repeat_interval),
        command_rx,
        command_tx.downgrade(),
        output,
        notifications,
    );
    let task = tokio::spawn(actor.run(bindings));

    (handle, task)
}
