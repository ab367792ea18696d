//! Record types consumed by the exporter. Produced by the upstream
//! aggregation stage; this crate only reads them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event-time key for the proxy execution interval of an action.
pub const EVENT_PROXY_EXECUTION: &str = "ProxyExecution";

/// Completion status of a command, local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    #[default]
    Unknown,
    Success,
    CacheHit,
    NonZeroExit,
    Timeout,
    Interrupted,
    RemoteError,
    LocalFallback,
}

impl CommandStatus {
    /// Stable name used as a tag value.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Unknown => "UNKNOWN",
            CommandStatus::Success => "SUCCESS",
            CommandStatus::CacheHit => "CACHE_HIT",
            CommandStatus::NonZeroExit => "NON_ZERO_EXIT",
            CommandStatus::Timeout => "TIMEOUT",
            CommandStatus::Interrupted => "INTERRUPTED",
            CommandStatus::RemoteError => "REMOTE_ERROR",
            CommandStatus::LocalFallback => "LOCAL_FALLBACK",
        }
    }
}

/// A named span of wall-clock time inside an action's lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeInterval {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeInterval {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Milliseconds between `from` and `to`, or 0 when either endpoint is
    /// missing. A partial interval degrades to a zero-latency sample rather
    /// than skipping the record.
    pub fn millis(&self) -> f64 {
        match (self.from, self.to) {
            (Some(from), Some(to)) => (to - from).num_milliseconds() as f64,
            _ => 0.0,
        }
    }
}

/// One completed build action as reported by the proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Local completion status.
    pub status: CommandStatus,
    /// Completion status reported by the remote execution service.
    pub remote_status: CommandStatus,
    /// Free-form labels describing the action's kind.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Named time intervals captured during execution.
    #[serde(default)]
    pub event_times: HashMap<String, TimeInterval>,
}

impl ActionRecord {
    /// End-to-end proxy execution latency in milliseconds; 0 when the
    /// interval is absent or has a missing endpoint.
    pub fn proxy_execution_millis(&self) -> f64 {
        self.event_times
            .get(EVENT_PROXY_EXECUTION)
            .map(TimeInterval::millis)
            .unwrap_or(0.0)
    }
}

/// Aggregate statistics for a whole build, produced upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Total number of action records in the build.
    pub num_records: u64,
    /// Overall cache-hit ratio, 0.0..=1.0.
    pub cache_hit_ratio: f64,
    /// Wall-clock latency of the build in seconds.
    pub build_latency_s: f64,
}
