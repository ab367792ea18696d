//! Structured logging via the `tracing` crate.
//!
//! The proxy embeds this crate, so logging stays library-friendly: callers
//! opt in by calling [`init_logging`] once at process startup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::MonitoringError;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json or text.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
        }
    }
}

/// Initialize the tracing subscriber. `BUILDMON_LOG` overrides the
/// configured level with a full filter directive.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), MonitoringError> {
    let filter = match EnvFilter::try_from_env("BUILDMON_LOG") {
        Ok(filter) => filter,
        Err(_) => {
            let level = config.map(|c| c.level.as_str()).unwrap_or("info");
            EnvFilter::new(level)
        }
    };

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(MonitoringError::Config(format!(
            "invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }

    let base = Registry::default().with(filter);
    if format == "json" {
        base.with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .init();
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .init();
    }

    Ok(())
}
