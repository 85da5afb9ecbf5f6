use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default loopback port for the control API.
pub const DEFAULT_API_PORT: u16 = 47632;

/// Default delay between simulated keystrokes in the typing fallback.
pub const DEFAULT_KEY_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chrome executable path
    pub chrome_path: PathBuf,

    /// Loopback port the control API binds to
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Inter-key delay for the keystroke fallback, in milliseconds
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,

    /// Run the managed browser headless
    #[serde(default)]
    pub headless: bool,

    /// User-data directory for the managed browser profile.
    /// Defaults to <runtime dir>/profile when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_key_delay_ms() -> u64 {
    DEFAULT_KEY_DELAY_MS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chrome_path: Self::default_chrome_path(),
            api_port: DEFAULT_API_PORT,
            key_delay_ms: DEFAULT_KEY_DELAY_MS,
            headless: false,
            user_data_dir: None,
        }
    }
}

impl AppConfig {
    /// Get default Chrome path based on platform
    fn default_chrome_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            PathBuf::from("C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe")
        }
        #[cfg(target_os = "macos")]
        {
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
        }
        #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
        {
            PathBuf::from("/usr/bin/google-chrome")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.api_port, DEFAULT_API_PORT);
        assert_eq!(config.key_delay_ms, DEFAULT_KEY_DELAY_MS);
        assert!(!config.headless);
        assert!(config.user_data_dir.is_none());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = AppConfig {
            chrome_path: PathBuf::from("/opt/chrome/chrome"),
            api_port: 50100,
            key_delay_ms: 25,
            headless: true,
            user_data_dir: Some(PathBuf::from("/tmp/fieldscribe-profile")),
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.api_port, 50100);
        assert_eq!(back.key_delay_ms, 25);
        assert!(back.headless);
        assert_eq!(back.chrome_path, PathBuf::from("/opt/chrome/chrome"));
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let back: AppConfig = toml::from_str("chrome_path = \"/usr/bin/chromium\"\n").unwrap();
        assert_eq!(back.api_port, DEFAULT_API_PORT);
        assert_eq!(back.key_delay_ms, DEFAULT_KEY_DELAY_MS);
    }
}
