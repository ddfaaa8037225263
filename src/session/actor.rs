//! # Session Actor
//!
//! The task behind a [`super::SessionHandle`]. It owns the port, the frame
//! decoder and all per-port state, and drives [`SessionState`] from port
//! traffic, commands and timers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::discovery::{discover, DiscoveryError};
use super::state::{ConfigureFailure, Outcome, SessionState, Stimulus};
use super::{write_message, DeviceConfiguration, SessionCommand, SessionEvent, SessionSettings, READ_BUFFER_SIZE};
use crate::error::BridgeError;
use crate::framing::FrameDecoder;
use crate::protocol::{decode_message, HapticProfile, Message};
use crate::serial::{PortOpener, SerialPortIO};

/// What the serve loop does after handling one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// Device went silent; identify it again on the same port
    Rediscover,
    /// Port failed; drop it and reopen
    PortLost,
    Close,
}

pub(crate) struct SessionActor {
    path: String,
    opener: Arc<dyn PortOpener>,
    settings: SessionSettings,
    commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    state: SessionState,
    decoder: FrameDecoder,
    /// Last requested configuration, reapplied after reconnects
    configuration: Option<DeviceConfiguration>,
    /// Loaded haptic profiles by motor pin
    profiles: BTreeMap<u8, HapticProfile>,
    last_values: HashMap<u8, i16>,
    last_heard: Instant,
    heartbeat: Interval,
    configure_deadline: Option<Instant>,
    /// Set from a connection loss until the device is identified again
    reconnecting: bool,
    /// Next automatic discovery run while reconnecting
    retry_discovery_at: Option<Instant>,
    next_request_id: u32,
}

impl SessionActor {
    pub(crate) fn new(
        path: String,
        opener: Arc<dyn PortOpener>,
        settings: SessionSettings,
        commands: mpsc::Receiver<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let heartbeat = new_heartbeat(&settings);
        Self {
            path,
            opener,
            settings,
            commands,
            events,
            state: SessionState::Disconnected,
            decoder: FrameDecoder::new(),
            configuration: None,
            profiles: BTreeMap::new(),
            last_values: HashMap::new(),
            last_heard: Instant::now(),
            heartbeat,
            configure_deadline: None,
            reconnecting: false,
            retry_discovery_at: None,
            next_request_id: 1,
        }
    }

    /// Opens, serves and reopens the port until closed.
    pub(crate) async fn run(mut self) {
        info!("Session for {} started", self.path);

        loop {
            let mut port = match self.opener.open(&self.path).await {
                Ok(port) => port,
                Err(e) => {
                    warn!("Cannot open {}: {}", self.path, e);
                    if self.wait_for_reconnect().await == Step::Close {
                        break;
                    }
                    continue;
                }
            };

            let step = self.serve(port.as_mut()).await;
            drop(port);
            self.reset_connection();
            if step == Step::Close {
                break;
            }

            self.reconnecting = true;
            self.emit(SessionEvent::ConnectionLost { port: self.path.clone() });
            if self.wait_for_reconnect().await == Step::Close {
                break;
            }
        }

        info!("Session for {} closed", self.path);
        self.emit(SessionEvent::Closed { port: self.path.clone() });
    }

    /// Drives one open port. Returns [`Step::PortLost`] or [`Step::Close`].
    async fn serve(&mut self, port: &mut dyn SerialPortIO) -> Step {
        self.transition(Stimulus::PortOpened);

        loop {
            if self.state == SessionState::Discovering {
                if self.drain_queued_commands() == Step::Close {
                    return Step::Close;
                }
                let step = self.run_discovery(port).await;
                if step != Step::Continue {
                    return step;
                }
            }

            match self.step(port).await {
                Step::Continue => {}
                Step::Rediscover => {
                    self.reconnecting = true;
                    self.emit(SessionEvent::ConnectionLost { port: self.path.clone() });
                    self.last_values.clear();
                    self.configure_deadline = None;
                    self.transition(Stimulus::Rediscover);
                }
                other => return other,
            }
        }
    }

    async fn run_discovery(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let first_request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(self.settings.discovery_retries);

        match discover(port, &mut self.decoder, first_request_id, &self.settings).await {
            Ok(identity) => {
                self.reconnecting = false;
                self.retry_discovery_at = None;
                self.transition(Stimulus::Identified(identity));
                self.last_heard = Instant::now();
                self.heartbeat = new_heartbeat(&self.settings);
                self.emit(SessionEvent::Discovered {
                    port: self.path.clone(),
                    identity,
                });
                self.apply_configuration(port).await
            }
            Err(DiscoveryError::Exhausted { attempts }) => {
                warn!("Discovery on {} failed after {} attempts", self.path, attempts);
                self.transition(Stimulus::DiscoveryExhausted { attempts });
                self.emit(SessionEvent::DiscoveryFailed {
                    port: self.path.clone(),
                    attempts,
                });
                // A device that was lost keeps being looked for
                if self.reconnecting {
                    self.retry_discovery_at = Some(Instant::now() + self.settings.reconnect_interval);
                }
                Step::Continue
            }
            Err(e) => {
                warn!("Discovery on {} aborted: {}", self.path, e);
                Step::PortLost
            }
        }
    }

    /// Waits for the next port read, command or timer and handles it.
    async fn step(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let connected = self.state.is_connected();
        let silence_deadline = self.last_heard + self.settings.heartbeat_timeout();
        let configure_deadline = self.configure_deadline;
        let retry_discovery_at = self.retry_discovery_at;

        tokio::select! {
            read = port.read(&mut buf) => match read {
                Ok(0) => {
                    warn!("Port {} closed by the device", self.path);
                    Step::PortLost
                }
                Ok(n) => self.handle_bytes(port, &buf[..n]).await,
                Err(e) => {
                    warn!("Read error on {}: {}", self.path, e);
                    Step::PortLost
                }
            },
            command = self.commands.recv() => match command {
                Some(command) => self.handle_command(port, command).await,
                // Every handle dropped
                None => Step::Close,
            },
            _ = self.heartbeat.tick(), if connected => {
                self.send(port, &Message::Heartbeat).await
            }
            _ = sleep_until(silence_deadline), if connected => {
                warn!(
                    "No traffic from {} for {:?}, treating as connection loss",
                    self.path,
                    self.settings.heartbeat_timeout()
                );
                Step::Rediscover
            }
            _ = sleep_until(configure_deadline.unwrap_or(silence_deadline)), if configure_deadline.is_some() => {
                self.on_configure_timeout(port).await
            }
            _ = sleep_until(retry_discovery_at.unwrap_or(silence_deadline)), if retry_discovery_at.is_some() => {
                self.retry_discovery_at = None;
                info!("Retrying discovery on {}", self.path);
                self.transition(Stimulus::Rediscover);
                Step::Continue
            }
        }
    }

    async fn handle_bytes(&mut self, port: &mut dyn SerialPortIO, bytes: &[u8]) -> Step {
        self.decoder.extend(bytes);

        while let Some(frame) = self.decoder.next_frame() {
            match decode_message(&frame) {
                Ok(message) => {
                    self.last_heard = Instant::now();
                    let step = self.handle_message(port, message).await;
                    if step != Step::Continue {
                        return step;
                    }
                }
                Err(e) => warn!("Dropping frame from {}: {}", self.path, e),
            }
        }
        Step::Continue
    }

    async fn handle_message(&mut self, port: &mut dyn SerialPortIO, message: Message) -> Step {
        match message {
            Message::InputValue { pin, value } => {
                if self.last_values.insert(pin, value) != Some(value) {
                    self.emit(SessionEvent::InputValueUpdated {
                        port: self.path.clone(),
                        pin,
                        value,
                    });
                }
                Step::Continue
            }
            Message::Heartbeat => Step::Continue,
            Message::ConfigurationStored { config_id } => {
                match self.transition(Stimulus::Stored { config_id }) {
                    Outcome::Applied { config_id } => {
                        info!("Configuration {} stored on {}", config_id, self.path);
                        self.configure_deadline = None;
                        self.emit(SessionEvent::ConfigurationApplied {
                            port: self.path.clone(),
                            config_id,
                        });
                        self.send_profiles(port).await
                    }
                    _ => {
                        debug!("Ignoring acknowledgement of configuration {}", config_id);
                        Step::Continue
                    }
                }
            }
            Message::ConfigurationError { config_id, reason } => {
                match self.transition(Stimulus::Rejected { config_id, reason }) {
                    Outcome::Failed(failure) => {
                        error!("Configuration {} rejected by {}: {}", config_id, self.path, reason);
                        self.configure_deadline = None;
                        self.emit(SessionEvent::ConfigurationFailed {
                            port: self.path.clone(),
                            config_id,
                            failure,
                        });
                    }
                    _ => debug!("Ignoring error for configuration {}", config_id),
                }
                Step::Continue
            }
            Message::IdentityResponse(identity) => {
                debug!("Late identity response {} ignored", identity.request_id);
                Step::Continue
            }
            other => {
                warn!("Unexpected {} from {}", other.name(), self.path);
                Step::Continue
            }
        }
    }

    async fn handle_command(&mut self, port: &mut dyn SerialPortIO, command: SessionCommand) -> Step {
        match command {
            SessionCommand::Configure(configuration) => {
                self.configuration = Some(configuration);
                if self.state.is_connected() {
                    return self.push_configuration(port).await;
                }
                Step::Continue
            }
            SessionCommand::LoadProfile(profile) => {
                let message = Message::LoadBldcProfile(profile.clone());
                self.profiles.insert(profile.pin, profile);
                self.send_if_connected(port, &message).await
            }
            SessionCommand::UnloadProfile { pin } => {
                self.profiles.remove(&pin);
                self.send_if_connected(port, &Message::DeactivateBldcProfile { pin }).await
            }
            SessionCommand::RetryCalibration { pin } => {
                self.send_if_connected(port, &Message::RetryCalibration { pin }).await
            }
            SessionCommand::Rediscover => {
                self.configure_deadline = None;
                self.retry_discovery_at = None;
                self.last_values.clear();
                self.transition(Stimulus::Rediscover);
                Step::Continue
            }
            SessionCommand::InputValues(reply) => {
                let _ = reply.send(self.last_values.clone());
                Step::Continue
            }
            SessionCommand::State(reply) => {
                let _ = reply.send(self.state.clone());
                Step::Continue
            }
            SessionCommand::Close => Step::Close,
        }
    }

    /// After discovery: push the configuration unless the device already
    /// holds it, then restore haptic profiles.
    async fn apply_configuration(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let Some(config_id) = self.configuration.as_ref().map(|c| c.config_id) else {
            return self.send_profiles(port).await;
        };

        if self.state.stored_config_id() != Some(config_id) {
            return self.push_configuration(port).await;
        }

        info!("{} already holds configuration {}", self.path, config_id);
        self.emit(SessionEvent::ConfigurationApplied {
            port: self.path.clone(),
            config_id,
        });
        self.send_profiles(port).await
    }

    async fn push_configuration(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let Some(configuration) = &self.configuration else {
            return Step::Continue;
        };
        let config_id = configuration.config_id;
        let messages = match configuration.messages() {
            Ok(messages) => messages,
            Err(e) => {
                self.fail_configuration(config_id, ConfigureFailure::Invalid(e));
                return Step::Continue;
            }
        };

        info!("Pushing configuration {} ({} parts) to {}", config_id, messages.len(), self.path);
        self.transition(Stimulus::ConfigurationSent {
            config_id,
            total_parts: messages.len() as u8,
        });
        self.write_configuration(port, &messages).await
    }

    async fn write_configuration(&mut self, port: &mut dyn SerialPortIO, messages: &[Message]) -> Step {
        self.configure_deadline = Some(Instant::now() + self.settings.configure_timeout);
        for message in messages {
            if self.send(port, message).await == Step::PortLost {
                return Step::PortLost;
            }
        }
        Step::Continue
    }

    fn fail_configuration(&mut self, config_id: u32, failure: ConfigureFailure) {
        self.configure_deadline = None;
        error!("Configuration {} failed on {}: {}", config_id, self.path, failure);
        self.emit(SessionEvent::ConfigurationFailed {
            port: self.path.clone(),
            config_id,
            failure,
        });
    }

    async fn on_configure_timeout(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let retries = self.settings.configure_retries;
        match self.transition(Stimulus::ConfigureTimedOut { retries }) {
            Outcome::Retry { attempt } => {
                warn!("Configuration unacknowledged by {}, resending (attempt {})", self.path, attempt);
                // Validated when first pushed
                let messages = self
                    .configuration
                    .as_ref()
                    .and_then(|c| c.messages().ok())
                    .unwrap_or_default();
                self.write_configuration(port, &messages).await
            }
            Outcome::Failed(failure) => {
                let config_id = self.configuration.as_ref().map_or(0, |c| c.config_id);
                self.fail_configuration(config_id, failure);
                Step::Continue
            }
            _ => {
                self.configure_deadline = None;
                Step::Continue
            }
        }
    }

    async fn send_profiles(&mut self, port: &mut dyn SerialPortIO) -> Step {
        let messages: Vec<Message> = self.profiles.values().cloned().map(Message::LoadBldcProfile).collect();
        for message in &messages {
            if self.send(port, message).await == Step::PortLost {
                return Step::PortLost;
            }
        }
        Step::Continue
    }

    async fn send_if_connected(&mut self, port: &mut dyn SerialPortIO, message: &Message) -> Step {
        if !self.state.is_connected() {
            debug!("{} not connected, {} deferred", self.path, message.name());
            return Step::Continue;
        }
        self.send(port, message).await
    }

    /// Writes one message. Only port failures end the connection; a message
    /// that fails validation is dropped.
    async fn send(&mut self, port: &mut dyn SerialPortIO, message: &Message) -> Step {
        match write_message(port, message).await {
            Ok(()) => Step::Continue,
            Err(BridgeError::Encode(e)) => {
                error!("Refusing to send invalid {} to {}: {}", message.name(), self.path, e);
                Step::Continue
            }
            Err(e) => {
                warn!("Write error on {}: {}", self.path, e);
                Step::PortLost
            }
        }
    }

    /// Waits out the reconnect interval while still answering commands.
    async fn wait_for_reconnect(&mut self) -> Step {
        let until = sleep(self.settings.reconnect_interval);
        tokio::pin!(until);

        loop {
            tokio::select! {
                _ = &mut until => return Step::Continue,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_offline(command) == Step::Close {
                            return Step::Close;
                        }
                    }
                    None => return Step::Close,
                },
            }
        }
    }

    /// Applies commands queued before the device is identified, so a
    /// configuration requested up front is known to discovery.
    fn drain_queued_commands(&mut self) -> Step {
        while let Ok(command) = self.commands.try_recv() {
            if self.handle_offline(command) == Step::Close {
                return Step::Close;
            }
        }
        Step::Continue
    }

    /// Handles a command while no device is identified.
    fn handle_offline(&mut self, command: SessionCommand) -> Step {
        match command {
            SessionCommand::Close => return Step::Close,
            SessionCommand::Configure(configuration) => self.configuration = Some(configuration),
            SessionCommand::LoadProfile(profile) => {
                self.profiles.insert(profile.pin, profile);
            }
            SessionCommand::UnloadProfile { pin } => {
                self.profiles.remove(&pin);
            }
            SessionCommand::InputValues(reply) => {
                let _ = reply.send(HashMap::new());
            }
            SessionCommand::State(reply) => {
                let _ = reply.send(self.state.clone());
            }
            SessionCommand::RetryCalibration { pin } => {
                debug!("{} not connected, calibration retry for pin {} dropped", self.path, pin);
            }
            SessionCommand::Rediscover => {}
        }
        Step::Continue
    }

    /// Forgets everything tied to the dropped port.
    fn reset_connection(&mut self) {
        self.transition(Stimulus::Disconnected);
        self.decoder.clear();
        self.last_values.clear();
        self.configure_deadline = None;
        self.retry_discovery_at = None;
    }

    fn transition(&mut self, stimulus: Stimulus) -> Outcome {
        let (state, outcome) = std::mem::take(&mut self.state).on(stimulus);
        if outcome != Outcome::Ignored {
            debug!("{}: now {:?}", self.path, state);
        }
        self.state = state;
        outcome
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn new_heartbeat(settings: &SessionSettings) -> Interval {
    let mut heartbeat = interval_at(Instant::now() + settings.heartbeat_interval, settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat
}
