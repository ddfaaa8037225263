//! # Train IO Bridge
//!
//! Connect home-built train cab controls to a train simulator.
//!
//! # Usage
//!
//! ```text
//! train-io-bridge [--config FILE]                       run every configured port
//! train-io-bridge [--config FILE] calibrate PORT PIN    calibrate one analog lever
//! ```
//!
//! `FILE` defaults to `config/default.toml`.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load and validate the configuration
//!    - Set up logging to stdout and a daily rolling file
//!    - Load the profile of every port
//!
//! 2. **Running**
//!    - One session task per port discovers, configures and watches its board
//!    - One controller task per port turns input values into commands
//!    - A shared dispatcher hands commands to the simulator sink
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C closes every session
//!    - Controllers stop their repeat timers and the dispatcher drains

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use train_io_bridge::calibration::{Phase, Recorder, DEFAULT_MAX_HARDWARE_VALUE};
use train_io_bridge::config::{Config, LoggingConfig, PortConfig};
use train_io_bridge::controller::{follow_session, spawn_controller};
use train_io_bridge::profile::Profile;
use train_io_bridge::serial::{PortOpener, SerialPortOpener};
use train_io_bridge::session::{spawn_session, SessionEvent, SessionHandle};
use train_io_bridge::simulator::{dispatch_commands, LoggingSink, SimulatorSink};
use train_io_bridge::telemetry::CommandLogger;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Queue between the controllers and the command dispatcher
const OUTPUT_QUEUE_SIZE: usize = 256;

const NOTIFICATION_QUEUE_SIZE: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "train-io-bridge")]
#[command(about = "Connect home-built train cab controls to a train simulator")]
#[command(version)]
struct Cli {
    /// Bridge configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Runs every configured port when omitted
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Record one analog lever and print its calibration
    Calibrate {
        /// Serial port of the board, e.g. /dev/ttyACM0
        port: String,

        /// Analog pin of the lever
        pin: u8,
    },
}

/// Install the stdout subscriber and, if configured, the rolling file writer
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes the
/// file writer when dropped.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "train-io-bridge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn load_profile(port: &PortConfig) -> Result<Profile> {
    match &port.profile {
        Some(path) => {
            Profile::load(Path::new(path)).with_context(|| format!("Failed to load profile {} for {}", path, port.path))
        }
        None => {
            warn!("No profile for {}, input values will not be bound", port.path);
            Ok(Profile::default())
        }
    }
}

/// Queue the profile's device configuration and haptic profiles
async fn apply_profile(session: &SessionHandle, profile: &Profile) -> Result<()> {
    if let Some(device) = &profile.device {
        session.configure(device.clone()).await?;
    }
    for haptic in &profile.haptics {
        session.load_profile(haptic.clone()).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let _log_guard = init_logging(&config.logging);

    info!("Train IO Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None => run(config).await,
        Some(Command::Calibrate { port, pin }) => calibrate(config, port, pin).await,
    }
}

async fn run(config: Config) -> Result<()> {
    if config.ports.is_empty() {
        bail!("No ports configured");
    }

    let profiles = config
        .ports
        .iter()
        .map(|port| load_profile(port).map(|profile| (port.path.clone(), profile)))
        .collect::<Result<Vec<_>>>()?;

    let sink: Arc<dyn SimulatorSink> = if config.command_log.enabled {
        Arc::new(CommandLogger::new(
            &config.command_log.log_dir,
            config.command_log.max_records_per_file,
            config.command_log.max_files_to_keep,
        )?)
    } else {
        Arc::new(LoggingSink)
    };

    let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE_SIZE);
    let (notifications, _) = broadcast::channel(NOTIFICATION_QUEUE_SIZE);
    let dispatcher = tokio::spawn(dispatch_commands(output_rx, sink, notifications.clone()));

    let opener: Arc<dyn PortOpener> = Arc::new(SerialPortOpener::new(config.serial.baud_rate));
    let settings = config.session_settings();

    let mut sessions = Vec::new();
    let mut tasks = Vec::new();

    for (path, profile) in profiles {
        let (session, session_task) = spawn_session(path.as_str(), Arc::clone(&opener), settings.clone());
        let (controller, controller_task) = spawn_controller(
            profile.bindings(),
            config.default_repeat_interval(),
            output_tx.clone(),
            notifications.clone(),
        );
        tasks.push(tokio::spawn(follow_session(session.subscribe(), controller)));
        tasks.push(tokio::spawn(report_events(session.subscribe())));
        tasks.push(session_task);
        tasks.push(controller_task);

        apply_profile(&session, &profile).await?;
        info!("Started {} with profile '{}'", path, profile.name);
        sessions.push(session);
    }

    // Controllers hold the remaining senders
    drop(output_tx);

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    for session in &sessions {
        if let Err(e) = session.close().await {
            warn!("{}: {}", session.port(), e);
        }
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed during shutdown: {}", e);
        }
    }
    if let Err(e) = dispatcher.await {
        error!("Command dispatcher failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Surface session outcomes that need the user's attention
async fn report_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::DiscoveryFailed { port, attempts }) => {
                error!("No board answered on {} after {} attempts", port, attempts);
            }
            Ok(SessionEvent::ConfigurationFailed {
                port,
                config_id,
                failure,
            }) => {
                error!("{} rejected configuration {}: {}", port, config_id, failure);
            }
            Ok(SessionEvent::Closed { .. }) | Err(RecvError::Closed) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

/// Record one lever interactively and print its calibration
async fn calibrate(config: Config, port: String, pin: u8) -> Result<()> {
    let opener: Arc<dyn PortOpener> = Arc::new(SerialPortOpener::new(config.serial.baud_rate));
    let (session, session_task) = spawn_session(port.as_str(), opener, config.session_settings());
    let mut events = session.subscribe();

    // The board only reports the pin once its inputs are configured
    if let Some(port_config) = config.ports.iter().find(|p| p.path == port) {
        let profile = load_profile(port_config)?;
        apply_profile(&session, &profile).await?;
    }

    let mut recorder = Recorder::new(pin, DEFAULT_MAX_HARDWARE_VALUE);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    println!("Calibrating pin {} on {}", pin, port);
    println!("Hold the lever at its minimum position and press Enter");

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::InputValueUpdated { pin, value, .. }) => recorder.record(pin, value),
                Ok(SessionEvent::Discovered { identity, .. }) => {
                    info!("Board {} (protocol {}) connected", identity.device_id, identity.version);
                }
                Ok(SessionEvent::DiscoveryFailed { attempts, .. }) => {
                    warn!("No board answered after {} attempts, retrying", attempts);
                    session.rediscover().await?;
                }
                Ok(SessionEvent::Closed { .. }) | Err(RecvError::Closed) => {
                    break Err(anyhow::anyhow!("Session for {} closed", port));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} samples", missed),
            },
            line = stdin.next_line() => {
                if line?.is_none() {
                    break Err(anyhow::anyhow!("Calibration aborted"));
                }
                match recorder.phase() {
                    Phase::Minimum => {
                        recorder.advance();
                        println!("Move the lever slowly to its maximum position, then press Enter");
                    }
                    Phase::Sweep => {
                        recorder.advance();
                        println!("Hold the lever at its maximum position and press Enter");
                    }
                    Phase::Maximum => break recorder.finish().map_err(anyhow::Error::from),
                }
            }
        }
    };

    // Already closed if the session ended the loop
    let _ = session.close().await;
    session_task.await?;

    let calibration = result?;
    println!();
    println!("[levers.calibration]");
    print!("{}", toml::to_string(&calibration)?);
    Ok(())
}
