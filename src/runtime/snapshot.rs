//! Last successful scan, persisted for inspection between scans. Purely
//! observational: mutation always re-validates against the live page, and
//! the snapshot carries no structural locators.

use crate::registry::FieldDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "last_scan.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub captured_at: DateTime<Utc>,
    pub url: String,
    pub fields: Vec<FieldDescriptor>,
}

fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

pub async fn save(dir: &Path, snapshot: &RuntimeSnapshot) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let text = serde_json::to_string_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(snapshot_path(dir), text).await
}

pub async fn load(dir: &Path) -> io::Result<Option<RuntimeSnapshot>> {
    match tokio::fs::read_to_string(snapshot_path(dir)).await {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldConstraints, FieldDescriptor};

    #[tokio::test]
    async fn test_snapshot_roundtrip_drops_dom_path() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = RuntimeSnapshot {
            captured_at: Utc::now(),
            url: "https://example.com/apply".to_string(),
            fields: vec![FieldDescriptor {
                field_id: "fld_0123456789ab".to_string(),
                dom_path: "form > textarea".to_string(),
                kind: "textarea".to_string(),
                label: "자기소개".to_string(),
                placeholder: None,
                hints: vec!["500자 이내".to_string()],
                constraints: FieldConstraints {
                    required: true,
                    max_length: Some(500),
                    pattern: None,
                    language_hint: Some("ko".to_string()),
                },
            }],
        };

        save(dir.path(), &snapshot).await.unwrap();
        let loaded = load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.fields.len(), 1);
        assert_eq!(loaded.fields[0].field_id, "fld_0123456789ab");
        assert_eq!(loaded.fields[0].constraints.max_length, Some(500));
        // dom_path is never persisted; it deserializes to the default
        assert_eq!(loaded.fields[0].dom_path, "");
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).await.unwrap().is_none());
    }
}
