//! Session lifecycle state on disk: the connection descriptor that lets
//! ephemeral clients find the live controller, and the observational
//! snapshot of the last scan.

pub mod descriptor;
pub mod snapshot;

use std::path::PathBuf;

/// Working data directory for descriptor, snapshot, and the default
/// managed browser profile.
pub fn default_runtime_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fieldscribe")
}
