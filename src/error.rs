//! Error types for the extraction monitor.

use std::time::Duration;

/// Top-level error type for the monitor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures talking to the remote task service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Cancel/retry commands rejected locally or by the remote service.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Job {id} has not failed, nothing to retry")]
    NotFailed { id: String },

    #[error("Cancel of job {id} rejected: {reason}")]
    CancelRejected { id: String, reason: String },

    #[error("Batch cancel rejected: {reason}")]
    BatchCancelRejected { reason: String },

    #[error("Retry of job {id} unavailable: {reason}")]
    RetryUnavailable { id: String, reason: String },
}

/// Bulk-operation monitor errors.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Task {id} still running after {after:?}")]
    TimedOut { id: String, after: Duration },
}

/// Result type alias for the monitor.
pub type Result<T> = std::result::Result<T, Error>;
