//! # Simulator Interface
//!
//! Commands produced by the input controllers and the seam through which they
//! reach the simulator. Delivery is fire-and-forget: a failed write is logged
//! and reported to subscribers, never retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::controller::ControllerNotification;

/// One value write to a simulator endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatorCommand {
    pub endpoint: String,
    pub value: f64,
}

impl SimulatorCommand {
    pub fn new(endpoint: impl Into<String>, value: f64) -> Self {
        Self {
            endpoint: endpoint.into(),
            value,
        }
    }
}

/// A simulator write failed
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("simulator rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },

    #[error("simulator unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination of simulator commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SimulatorSink: Send + Sync {
    async fn write_value(&self, endpoint: &str, value: f64) -> Result<(), SinkError>;
}

/// Sink that only logs, for running without a simulator
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl SimulatorSink for LoggingSink {
    async fn write_value(&self, endpoint: &str, value: f64) -> Result<(), SinkError> {
        info!("{} = {}", endpoint, value);
        Ok(())
    }
}

/// Deliver commands to `sink` until every sender is dropped
///
/// Failures are published as [`ControllerNotification::CommandFailed`] and
/// the loop moves on to the next command.
pub async fn dispatch_commands(
    mut commands: mpsc::Receiver<SimulatorCommand>,
    sink: Arc<dyn SimulatorSink>,
    notifications: broadcast::Sender<ControllerNotification>,
) {
    let mut delivered: u64 = 0;

    while let Some(command) = commands.recv().await {
        match sink.write_value(&command.endpoint, command.value).await {
            Ok(()) => {
                delivered += 1;
                debug!("Delivered {} = {}", command.endpoint, command.value);
            }
            Err(e) => {
                warn!("Failed to write {}: {}", command.endpoint, e);
                let _ = notifications.send(ControllerNotification::CommandFailed {
                    endpoint: command.endpoint,
                    error: e.to_string(),
                });
            }
        }
    }

    info!("Command dispatcher stopped after {} deliveries", delivered);
}
