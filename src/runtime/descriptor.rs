//! Connection descriptor: the one signal clients use to decide whether a
//! controller is reachable. Written after the listener binds, removed last
//! on shutdown. A stale file (process died without cleanup) is treated by
//! clients as a connection failure, never as ground truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const DESCRIPTOR_FILE: &str = "runner.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Fresh, exclusively-owned browser profile
    Managed,
    /// Attached to an already-running browser
    Attach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub port: u16,
    pub mode: SessionMode,
    pub started_at: DateTime<Utc>,
}

fn descriptor_path(dir: &Path) -> PathBuf {
    dir.join(DESCRIPTOR_FILE)
}

/// Atomically publish the descriptor: write a temp file, then rename, so a
/// client never observes a half-written record.
pub async fn publish(dir: &Path, descriptor: &ConnectionDescriptor) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let text = serde_json::to_string_pretty(descriptor)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = dir.join(format!("{}.tmp", DESCRIPTOR_FILE));
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, descriptor_path(dir)).await?;
    tracing::info!("Published connection descriptor on port {}", descriptor.port);
    Ok(())
}

/// Load the descriptor if present. `None` means "controller not running".
pub async fn load(dir: &Path) -> io::Result<Option<ConnectionDescriptor>> {
    match tokio::fs::read_to_string(descriptor_path(dir)).await {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove the descriptor. Missing file is fine: shutdown must be able to
/// run this unconditionally, even after partial teardown failures.
pub async fn remove(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(descriptor_path(dir)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(port: u16) -> ConnectionDescriptor {
        ConnectionDescriptor {
            port,
            mode: SessionMode::Managed,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_load_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), &sample(47632)).await.unwrap();

        let loaded = load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.port, 47632);
        assert_eq!(loaded.mode, SessionMode::Managed);

        remove(dir.path()).await.unwrap();
        assert!(load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), &sample(50000)).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["runner.json"]);
    }

    #[tokio::test]
    async fn test_publish_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), &sample(1000)).await.unwrap();
        publish(dir.path(), &sample(2000)).await.unwrap();
        let loaded = load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.port, 2000);
    }

    #[test]
    fn test_mode_wire_format() {
        let json = serde_json::to_string(&SessionMode::Attach).unwrap();
        assert_eq!(json, "\"attach\"");
        let json = serde_json::to_string(&SessionMode::Managed).unwrap();
        assert_eq!(json, "\"managed\"");
    }
}
