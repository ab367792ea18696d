//! Error types for the telemetry export pipeline.

use thiserror::Error;

/// Errors surfaced by the monitoring pipeline.
///
/// Only initialization errors reach callers; everything past `initialize`
/// is best-effort and must never affect the build being measured.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("views were already setup, cannot overwrite")]
    AlreadyRegistered,

    #[error("invalid tag key: {0}")]
    InvalidTagKey(String),

    #[error("monitoring initialization failed: {0}")]
    InitializationFailed(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MonitoringError {
    fn from(err: config::ConfigError) -> Self {
        MonitoringError::Config(err.to_string())
    }
}
