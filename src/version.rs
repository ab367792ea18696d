//! Running proxy version, attached to every exported sample.

/// Version string of the running proxy build.
pub fn current_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
