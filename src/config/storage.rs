//! Config file persistence under the platform config dir. A missing file is
//! `None`, same as the runtime descriptor; an unreadable or malformed file
//! is an error with the offending path in the message.

use crate::config::schema::AppConfig;
use crate::error::{FieldscribeError, Result};
use std::io;
use std::path::{Path, PathBuf};

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("fieldscribe"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

pub async fn load_from(path: &Path) -> Result<Option<AppConfig>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let config = toml::from_str(&text).map_err(|e| {
                FieldscribeError::Config(format!("{}: {}", path.display(), e))
            })?;
            Ok(Some(config))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn save_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let text = toml::to_string_pretty(config)?;
    tokio::fs::write(path, text).await?;
    Ok(())
}

/// Load the config, writing the defaults on first run so the file exists
/// for the user to edit.
pub async fn load_or_init() -> Result<AppConfig> {
    let path = config_path();
    match load_from(&path).await? {
        Some(config) => {
            tracing::info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => {
            tracing::info!("No config at {}, writing defaults", path.display());
            let config = AppConfig::default();
            save_to(&path, &config).await?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.api_port = 50123;
        config.key_delay_ms = 10;
        save_to(&path, &config).await.unwrap();

        let loaded = load_from(&path).await.unwrap().unwrap();
        assert_eq!(loaded.api_port, 50123);
        assert_eq!(loaded.key_delay_ms, 10);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(&dir.path().join("config.toml"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "chrome_path = [not toml")
            .await
            .unwrap();

        let err = load_from(&path).await.unwrap_err();
        assert!(matches!(err, FieldscribeError::Config(_)));
        assert!(err.to_string().contains("config.toml"));
    }
}
