//! Monitoring configuration.
//!
//! Hierarchical configuration in the usual proxy order: defaults, optional
//! config file, then `BUILDMON_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MonitoringError;

fn default_metric_prefix() -> String {
    "custom.googleapis.com".to_string()
}

fn default_namespace() -> String {
    "buildmon".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_reporting_interval_secs() -> u64 {
    60
}

/// Configuration for the metrics exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Cloud project metrics are exported to.
    pub project: String,

    /// Prefix prepended to exported metric names.
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Namespace label of the exported resource.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Base URL of the monitoring backend.
    pub endpoint: String,

    /// Directory holding proxy log files, consulted for failure sentinels.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Seconds between background uploads.
    #[serde(default = "default_reporting_interval_secs")]
    pub reporting_interval_secs: u64,
}

impl MonitoringConfig {
    /// Load configuration from an optional TOML file plus `BUILDMON_*`
    /// environment variables; the environment wins.
    pub fn load(path: Option<&Path>) -> Result<Self, MonitoringError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("BUILDMON"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn reporting_interval(&self) -> Duration {
        Duration::from_secs(self.reporting_interval_secs)
    }
}
