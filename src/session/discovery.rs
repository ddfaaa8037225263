//! # Device Discovery
//!
//! Identifies the board behind a freshly opened port. Opening a port toggles
//! its control lines, which resets many boards, so discovery first waits for
//! the board to settle and discards whatever arrived meanwhile.

use std::io;

use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{write_message, SessionSettings, READ_BUFFER_SIZE};
use crate::framing::FrameDecoder;
use crate::error::BridgeError;
use crate::protocol::{decode_message, EncodeError, Identity, Message};
use crate::serial::SerialPortIO;

/// Discovery did not produce an identity
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Every attempt timed out or was answered with something unexpected
    #[error("no identity response after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("port closed during discovery")]
    PortClosed,

    #[error("I/O error during discovery: {0}")]
    Io(#[from] io::Error),

    #[error("identity request could not be encoded: {0}")]
    Encode(#[from] EncodeError),
}

impl DiscoveryError {
    /// Narrows a failed write to the errors discovery can report
    fn from_write(error: BridgeError) -> Self {
        match error {
            BridgeError::Io(e) => Self::Io(e),
            BridgeError::Encode(e) => Self::Encode(e),
            other => Self::Io(io::Error::other(other.to_string())),
        }
    }
}

/// Run discovery on `port`
///
/// Sends up to `settings.discovery_retries` identity requests, numbered from
/// `first_request_id`, and waits `settings.discovery_timeout` for each one.
/// Timeouts, decode failures and unexpected message types all count as a
/// failed attempt. Identity responses echoing an older request are skipped.
///
/// # Errors
///
/// * [`DiscoveryError::Exhausted`] once every attempt failed
/// * [`DiscoveryError::Io`] / [`DiscoveryError::PortClosed`] if the port fails
pub async fn discover(
    port: &mut dyn SerialPortIO,
    decoder: &mut FrameDecoder,
    first_request_id: u32,
    settings: &SessionSettings,
) -> Result<Identity, DiscoveryError> {
    sleep(settings.settle_delay).await;
    port.discard_input()?;
    decoder.clear();

    let mut buf = [0u8; READ_BUFFER_SIZE];
    for attempt in 0..settings.discovery_retries {
        let request_id = first_request_id.wrapping_add(attempt);
        write_message(port, &Message::IdentityRequest { request_id })
            .await
            .map_err(DiscoveryError::from_write)?;

        let deadline = Instant::now() + settings.discovery_timeout;
        if let Some(identity) = await_identity(port, decoder, request_id, deadline, &mut buf).await? {
            info!(
                "Discovered device {} (protocol v{}, config {})",
                identity.device_id, identity.version, identity.config_id
            );
            return Ok(identity);
        }
        warn!(
            "Identity request {} unanswered (attempt {}/{})",
            request_id,
            attempt + 1,
            settings.discovery_retries
        );
    }

    Err(DiscoveryError::Exhausted {
        attempts: settings.discovery_retries,
    })
}

/// Reads until the response to `request_id` arrives. `Ok(None)` ends the
/// attempt.
async fn await_identity(
    port: &mut dyn SerialPortIO,
    decoder: &mut FrameDecoder,
    request_id: u32,
    deadline: Instant,
    buf: &mut [u8],
) -> Result<Option<Identity>, DiscoveryError> {
    loop {
        while let Some(frame) = decoder.next_frame() {
            match decode_message(&frame) {
                Ok(Message::IdentityResponse(identity)) if identity.request_id == request_id => {
                    return Ok(Some(identity));
                }
                Ok(Message::IdentityResponse(identity)) => {
                    debug!("Skipping stale identity response {}", identity.request_id);
                }
                Ok(other) => {
                    debug!("Unexpected {} during discovery", other.name());
                    return Ok(None);
                }
                Err(e) => {
                    debug!("Undecodable frame during discovery: {}", e);
                    return Ok(None);
                }
            }
        }

        let n = match timeout_at(deadline, port.read(buf)).await {
            Ok(read) => read?,
            Err(_) => return Ok(None),
        };
        if n == 0 {
            return Err(DiscoveryError::PortClosed);
        }
        decoder.extend(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn settings() -> SessionSettings {
        SessionSettings {
            discovery_retries: 3,
            discovery_timeout: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(150),
            ..SessionSettings::default()
        }
    }

    fn identity(request_id: u32) -> Identity {
        Identity {
            request_id,
            version: 2,
            device_id: 9,
            config_id: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_succeeds_on_first_attempt() {
        let (mut port, device) = MockSerialPort::new();
        device.set_responder(|message| match message {
            Message::IdentityRequest { request_id } => vec![Message::IdentityResponse(identity(*request_id))],
            _ => Vec::new(),
        });
        let mut decoder = FrameDecoder::new();

        let found = discover(&mut port, &mut decoder, 10, &settings()).await.unwrap();
        assert_eq!(found, identity(10));
        assert_eq!(device.discards.load(Ordering::SeqCst), 1, "Stale input should be flushed once");
        assert_eq!(device.written_messages(), vec![Message::IdentityRequest { request_id: 10 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_port_exhausts_retries() {
        let (mut port, device) = MockSerialPort::new();
        let mut decoder = FrameDecoder::new();
        let started = Instant::now();

        let result = discover(&mut port, &mut decoder, 1, &settings()).await;
        assert!(matches!(result, Err(DiscoveryError::Exhausted { attempts: 3 })));
        assert_eq!(device.written_messages().len(), 3);
        // Settle delay plus three full read timeouts
        assert_eq!(started.elapsed(), Duration::from_millis(3150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_message_counts_as_retry() {
        let (mut port, device) = MockSerialPort::new();
        let mut answered = 0;
        device.set_responder(move |message| match message {
            Message::IdentityRequest { request_id } => {
                answered += 1;
                if answered == 1 {
                    vec![Message::Heartbeat]
                } else {
                    vec![Message::IdentityResponse(identity(*request_id))]
                }
            }
            _ => Vec::new(),
        });
        let mut decoder = FrameDecoder::new();

        let found = discover(&mut port, &mut decoder, 1, &settings()).await.unwrap();
        assert_eq!(found.request_id, 2, "Second request should be answered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_counts_as_retry() {
        let (mut port, device) = MockSerialPort::new();
        let mut answered = 0;
        let garbage_device = device.clone();
        device.set_responder(move |message| match message {
            Message::IdentityRequest { request_id } => {
                answered += 1;
                if answered == 1 {
                    // Unknown type code 0x7F
                    garbage_device.send_bytes(crate::framing::encode(&[0x7F, 1, 2]));
                    Vec::new()
                } else {
                    vec![Message::IdentityResponse(identity(*request_id))]
                }
            }
            _ => Vec::new(),
        });
        let mut decoder = FrameDecoder::new();

        let found = discover(&mut port, &mut decoder, 100, &settings()).await.unwrap();
        assert_eq!(found.request_id, 101);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_identity_is_skipped() {
        let (mut port, device) = MockSerialPort::new();
        device.set_responder(|message| match message {
            Message::IdentityRequest { request_id } => vec![
                Message::IdentityResponse(identity(request_id.wrapping_sub(1))),
                Message::IdentityResponse(identity(*request_id)),
            ],
            _ => Vec::new(),
        });
        let mut decoder = FrameDecoder::new();

        let found = discover(&mut port, &mut decoder, 5, &settings()).await.unwrap();
        assert_eq!(found.request_id, 5);
        assert_eq!(device.written_messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_port_is_an_io_error() {
        let (mut port, device) = MockSerialPort::new();
        device.break_connection();
        let mut decoder = FrameDecoder::new();

        let result = discover(&mut port, &mut decoder, 1, &settings()).await;
        assert!(matches!(result, Err(DiscoveryError::Io(_))));
    }
}
