//! Build-failure detection from sentinel marker files.
//!
//! Each proxy executable writes a `<name>.FATAL` file on fatal failure; a
//! non-empty sentinel in the log directory means the build failed. Absence
//! is the expected steady state and is never an error.

use std::path::Path;

use tracing::error;

/// Fatal-error sentinel filenames, one per executable component, with and
/// without the platform executable suffix. The list is a compatibility
/// constant shared with the cleanup pass below.
pub const FAILURE_FILES: [&str; 6] = [
    "reproxy.FATAL",
    "bootstrap.FATAL",
    "rewrapper.FATAL",
    "reproxy.exe.FATAL",
    "bootstrap.exe.FATAL",
    "rewrapper.exe.FATAL",
];

/// True when at least one sentinel file in `log_dir` exists and is
/// non-empty. Missing files, stat errors, and zero-length files all count
/// as "no failure signal".
pub fn check_build_failure(log_dir: &Path) -> bool {
    FAILURE_FILES.iter().any(|name| {
        match std::fs::metadata(log_dir.join(name)) {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    })
}

/// Remove all sentinel files so the next run starts from a clean slate.
/// "Not found" is ignored; any other removal error is logged and skipped.
pub fn clean_log_dir(log_dir: &Path) {
    for name in FAILURE_FILES {
        let path = log_dir.join(name);
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                error!(path = %path.display(), error = %err, "failed to remove sentinel file");
            }
        }
    }
}
