//! Error types for the bridge core
//!
//! Recoverable conditions (missing port, failed open, unmatched session)
//! are retried or refreshed by their owning component. Only a missing
//! canonical config and the `exitOnDisconnect` policy end the process.

use std::path::PathBuf;
use thiserror::Error;

/// Serial connection failures
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Requested device is absent and auto-detection is disabled
    #[error("no device exists at port path {0}")]
    PortNotFound(String),

    /// Transport-level open error
    #[error("failed to open {path}: {reason}")]
    OpenFailure { path: String, reason: String },

    /// Device enumeration failed
    #[error("failed to list serial devices: {0}")]
    Enumeration(String),

    /// Connection lost while `exitOnDisconnect` is set
    #[error("device disconnected and exitOnDisconnect is set")]
    ExitOnDisconnect,
}

/// Signal pipeline conditions
///
/// Never surfaced past the pipeline: malformed lines are dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("malformed line: {0:?}")]
    MalformedLine(String),
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures reported by a volume sink
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("mixer backend unavailable: {0}")]
    Unavailable(String),

    #[error("mixer operation failed: {0}")]
    Operation(String),
}
