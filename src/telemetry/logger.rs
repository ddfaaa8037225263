//! # Command Logger
//!
//! Writes every simulator command as one JSON line:
//!
//! ```text
//! {"timestamp":"2024-03-01T12:00:00.123Z","endpoint":"Throttle","value":0.5}
//! ```
//!
//! Files are named `commands_<timestamp>_<sequence>.jsonl`. A new file is
//! started after `max_records_per_file` lines and only the newest
//! `max_files_to_keep` files are kept.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::simulator::{SimulatorSink, SinkError};

const FILE_PREFIX: &str = "commands_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
struct Record<'a> {
    timestamp: String,
    endpoint: &'a str,
    value: f64,
}

struct LogFile {
    writer: BufWriter<File>,
    records: usize,
}

/// Rotating JSONL log of simulator commands
///
/// Clones share the open file, so a clone can be moved onto a blocking
/// thread for each write.
#[derive(Clone)]
pub struct CommandLogger {
    log_dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    current: Arc<Mutex<Option<LogFile>>>,
    sequence: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for CommandLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLogger")
            .field("log_dir", &self.log_dir)
            .field("max_records_per_file", &self.max_records_per_file)
            .field("max_files_to_keep", &self.max_files_to_keep)
            .finish_non_exhaustive()
    }
}

impl CommandLogger {
    /// Create a logger writing into `log_dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BridgeError::Io`] if the directory cannot be
    /// created.
    pub fn new<P: AsRef<Path>>(log_dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        info!("Logging simulator commands to {}", log_dir.display());

        Ok(Self {
            log_dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            current: Arc::new(Mutex::new(None)),
            sequence: Arc::new(Mutex::new(0)),
        })
    }

    /// Append one command
    ///
    /// Blocks on file I/O; async callers go through [`SimulatorSink::write_value`].
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the record cannot be serialized or written.
    pub fn log(&self, endpoint: &str, value: f64) -> std::result::Result<(), SinkError> {
        self.log_at(Utc::now(), endpoint, value)
    }

    fn log_at(&self, now: DateTime<Utc>, endpoint: &str, value: f64) -> std::result::Result<(), SinkError> {
        let record = Record {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            endpoint,
            value,
        };
        let line = serde_json::to_string(&record)?;

        let mut current = self.current.lock().map_err(|_| poisoned())?;
        if current.as_ref().map_or(true, |file| file.records >= self.max_records_per_file) {
            if let Some(mut finished) = current.take() {
                finished.writer.flush()?;
            }
            *current = Some(self.open_next(now)?);
            self.remove_old_files();
        }

        let Some(file) = current.as_mut() else {
            return Err(poisoned());
        };
        writeln!(file.writer, "{}", line)?;
        file.writer.flush()?;
        file.records += 1;
        Ok(())
    }

    fn open_next(&self, now: DateTime<Utc>) -> std::result::Result<LogFile, SinkError> {
        let sequence = {
            let mut sequence = self.sequence.lock().map_err(|_| poisoned())?;
            *sequence += 1;
            *sequence
        };

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            now.format("%Y%m%d_%H%M%S"),
            sequence,
            FILE_EXTENSION
        );
        let path = self.log_dir.join(name);
        debug!("Starting command log {}", path.display());

        Ok(LogFile {
            writer: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    /// Log files in this directory, oldest first
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BridgeError::Io`] if the directory cannot be
    /// read.
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_log_file(path))
            .collect();
        // Timestamp then sequence, so names sort chronologically
        files.sort();
        Ok(files)
    }

    fn remove_old_files(&self) {
        let files = match self.log_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list command logs: {}", e);
                return;
            }
        };

        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old command log {}", path.display()),
                Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
            }
        }
    }
}

fn is_log_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX));
    name_matches && path.extension().and_then(|ext| ext.to_str()) == Some(FILE_EXTENSION)
}

fn poisoned() -> SinkError {
    SinkError::Unreachable("command log lock poisoned".to_string())
}

#[async_trait]
impl SimulatorSink for CommandLogger {
    async fn write_value(&self, endpoint: &str, value: f64) -> std::result::Result<(), SinkError> {
        let logger = self.clone();
        let endpoint = endpoint.to_owned();
        tokio::task::spawn_blocking(move || logger.log(&endpoint, value))
            .await
            .map_err(|e| SinkError::Unreachable(format!("command log writer failed: {}", e)))?
    }
}
