//! # Serial Communication Module
//!
//! Opens the serial ports the controller boards are attached to.
//!
//! This module handles:
//! - Opening a port at the configured baud rate (8N1, no flow control)
//! - Wrapping it behind [`SerialPortIO`] so sessions can be tested with mocks
//! - Reopening ports by path after a connection loss ([`PortOpener`])

pub mod port_trait;

pub use port_trait::{PortOpener, SerialPortIO, TokioSerialPort};

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Default baud rate of the controller firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Open a specific serial port with the board's line settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyACM0" or "COM3")
/// * `baud_rate` - Line speed
///
/// # Returns
///
/// * `Result<TokioSerialPort>` - Opened serial port
///
/// # Errors
///
/// Returns [`BridgeError::Serial`] if the port cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use train_io_bridge::serial::{open_port, DEFAULT_BAUD_RATE};
///
/// fn main() -> anyhow::Result<()> {
///     let port = open_port("/dev/ttyACM0", DEFAULT_BAUD_RATE)?;
///     Ok(())
/// }
/// ```
pub fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    debug!("Trying to open serial port: {}", path);

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| BridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened serial port {} at {} baud", path, baud_rate);
    Ok(TokioSerialPort::new(port))
}

/// [`PortOpener`] backed by real serial hardware
#[derive(Debug, Clone, Copy)]
pub struct SerialPortOpener {
    baud_rate: u32,
}

impl SerialPortOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialPortOpener {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl PortOpener for SerialPortOpener {
    async fn open(&self, path: &str) -> Result<Box<dyn SerialPortIO>> {
        let port = open_port(path, self.baud_rate)?;
        Ok(Box::new(port))
    }
}
