//! Buildmon: build-telemetry export pipeline
//!
//! Embedded in the remote build-acceleration proxy, this crate converts
//! per-action and per-build execution records into dimensional metrics and
//! ships them to a monitoring backend, while detecting build failure from
//! sentinel marker files in the proxy log directory.

pub mod auth;
pub mod config;
pub mod error;
pub mod labels;
pub mod logging;
pub mod monitoring;
pub mod types;
pub mod version;
