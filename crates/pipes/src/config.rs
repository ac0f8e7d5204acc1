//! Configuration management for the pipe core.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/mtp-pipe/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::task::upload::DEFAULT_COPY_BUFFER_SIZE;
use crate::worker::DEFAULT_QUEUE_CAPACITY;

/// Milliseconds shutdown waits for the worker by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2000;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("queue_capacity must be between 1 and 4096, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("shutdown_timeout_ms must be at most 600000, got {0}")]
    InvalidShutdownTimeout(u64),

    #[error("copy_buffer_size must be between 512 and 16777216 bytes, got {0}")]
    InvalidCopyBufferSize(usize),

    #[error("channel_capacity must be between 1 and 1024, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("staging_dir must not be empty")]
    EmptyStagingDir,

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Worker queue configuration.
    pub worker: WorkerConfig,

    /// Transfer and staging configuration.
    pub transfer: TransferConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Worker queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of tasks waiting in the queue.
    pub queue_capacity: usize,

    /// How long shutdown waits for queued tasks, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

/// Transfer and staging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Buffer size used when draining an upload pipe.
    pub copy_buffer_size: usize,

    /// Chunks that may be in flight on one pipe.
    pub channel_capacity: usize,

    /// Scratch directory for upload staging files.
    pub staging_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mtp-pipe")
        .join("config.toml")
}

/// Returns the default staging directory.
fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mtp-pipe")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - MTP_PIPE_STAGING_DIR: Override the upload staging directory
    /// - MTP_PIPE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MTP_PIPE_STAGING_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding staging_dir from environment: {}", dir);
                self.transfer.staging_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var("MTP_PIPE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.log.level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.worker.queue_capacity;
        if !(1..=4096).contains(&capacity) {
            return Err(ConfigError::InvalidQueueCapacity(capacity));
        }

        if self.worker.shutdown_timeout_ms > 600_000 {
            return Err(ConfigError::InvalidShutdownTimeout(
                self.worker.shutdown_timeout_ms,
            ));
        }

        let buffer = self.transfer.copy_buffer_size;
        if !(512..=16 * 1024 * 1024).contains(&buffer) {
            return Err(ConfigError::InvalidCopyBufferSize(buffer));
        }

        let channel = self.transfer.channel_capacity;
        if !(1..=1024).contains(&channel) {
            return Err(ConfigError::InvalidChannelCapacity(channel));
        }

        if self.transfer.staging_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStagingDir);
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Reads the config at `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No pipe config, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read pipe config {}", path.display()))
            }
        };

        Self::from_toml(&contents)
            .with_context(|| format!("pipe config {} is not usable", path.display()))
    }

    /// Reads the config at [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parses a config document. Missing sections and keys take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| {
            anyhow::anyhow!("malformed pipe config: {}", describe_toml_error(toml_str, &e))
        })
    }

    /// Writes the config to `path`, creating its directory first.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create directory {}", dir.display()))?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("cannot write pipe config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Pipe config saved");
        Ok(())
    }

    /// Renders the config as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("cannot render pipe config")
    }
}

/// Error text with the 1-based line and column of the offending key.
fn describe_toml_error(source: &str, error: &toml::de::Error) -> String {
    let message = error.message().trim_end();
    let Some(span) = error.span() else {
        return message.to_string();
    };

    let before = &source[..span.start.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    format!("{message} (line {line}, column {column})")
}
