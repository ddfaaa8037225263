//! # Telemetry Module
//!
//! Records simulator commands to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting each command as one JSON line with a UTC timestamp
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the last M files
//!
//! [`CommandLogger`] implements [`crate::simulator::SimulatorSink`], so the
//! bridge can run against the log alone when no simulator is attached.

pub mod logger;

pub use logger::CommandLogger;
