//! Sync settings
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. An explicit path passed by the caller (`--settings` on the CLI)
//! 2. `<platform config dir>/campus-config/settings.yaml`
//! 3. Built-in defaults
//!
//! Every field has a default, so a partial file is valid:
//!
//! ```yaml
//! server_url: https://config.example.edu
//! app_version: 2.1.0
//! prefer_compressed: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Settings file name inside the platform config directory
const SETTINGS_FILE: &str = "settings.yaml";

/// Settings for talking to the update server and laying out local files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Base URL of the update server (without the `/config` suffix)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// App build whose catalog should be requested
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Sent to the server in the `platform` header
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Root for `config/` and `temp/config/`
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Connection timeout for catalog and file requests
    #[serde(default = "default_timeout")]
    pub connect_timeout_seconds: u64,

    /// Read timeout for catalog and file requests
    #[serde(default = "default_timeout")]
    pub read_timeout_seconds: u64,

    /// Minimum time between update checks within one process
    #[serde(default = "default_update_check_interval")]
    pub update_check_interval_minutes: u64,

    /// Download the gzip variant of a file when the catalog offers one
    #[serde(default)]
    pub prefer_compressed: bool,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

fn default_documents_dir() -> PathBuf {
    directories::ProjectDirs::from("ca", "campusguide", "campus-config")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| dirs::data_dir().map(|d| d.join("campus-config")))
        .unwrap_or_else(|| PathBuf::from(".campus-config"))
}

fn default_timeout() -> u64 {
    5
}

fn default_update_check_interval() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            app_version: default_app_version(),
            platform: default_platform(),
            documents_dir: default_documents_dir(),
            connect_timeout_seconds: default_timeout(),
            read_timeout_seconds: default_timeout(),
            update_check_interval_minutes: default_update_check_interval(),
            prefer_compressed: false,
        }
    }
}

impl SyncSettings {
    /// Load settings from an explicit path, the default location, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_settings_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load settings from a YAML file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Settings(format!("Failed to read {}: {e}", path.display()))
        })?;

        Self::from_yaml(&content)
            .map_err(|e| SyncError::Settings(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml_ng::Error> {
        // An empty document means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content)
    }

    /// Default settings file path (`<config dir>/campus-config/settings.yaml`)
    pub fn default_settings_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("ca", "campusguide", "campus-config")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|d| d.join("campus-config")))
            .map(|dir| dir.join(SETTINGS_FILE))
    }

    /// URL of the catalog for the configured app version
    pub fn catalog_url(&self) -> String {
        format!(
            "{}/config/{}",
            self.server_url.trim_end_matches('/'),
            self.app_version
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let settings = SyncSettings::from_yaml(
            r#"
server_url: https://config.example.edu/
app_version: 2.1.0
"#,
        )
        .unwrap();

        assert_eq!(settings.app_version, "2.1.0");
        assert_eq!(settings.connect_timeout_seconds, 5);
        assert_eq!(settings.update_check_interval_minutes, 60);
        assert!(!settings.prefer_compressed);
        assert_eq!(
            settings.catalog_url(),
            "https://config.example.edu/config/2.1.0"
        );
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let settings = SyncSettings::from_yaml("  \n").unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            format!(
                "documents_dir: {}\nprefer_compressed: true\nread_timeout_seconds: 12\n",
                temp_dir.path().display()
            ),
        )
        .unwrap();

        let settings = SyncSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.documents_dir, temp_dir.path());
        assert!(settings.prefer_compressed);
        assert_eq!(settings.read_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = SyncSettings::load(Some(&temp_dir.path().join("nope.yaml")));
        assert!(matches!(result, Err(SyncError::Settings(_))));
    }
}
