//! Configuration sync error types with clear, actionable messages
//!
//! Every variant is `Clone` so that a single in-flight `init()` or update
//! pass can hand the same outcome to every caller waiting on it.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the configuration sync pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The version store could not be read or written
    #[error("Failed to access configuration version store: {0}")]
    Persistence(String),

    /// The remote catalog could not be fetched or parsed
    #[error("Configuration catalog is unavailable: {0}")]
    CatalogUnavailable(String),

    /// A config file failed to download
    #[error("Download of file {name} failed: {reason}")]
    DownloadFailed { name: String, reason: String },

    /// A downloaded file could not be moved into place
    #[error("Failed to install configuration file {name}: {reason}")]
    InstallFailed { name: String, reason: String },

    /// The recorded configuration is not fully present on disk
    #[error("Configuration is unavailable: {0}")]
    ConfigurationUnavailable(String),

    /// A requested file does not exist even though the gate is ready
    #[error("Configuration file '{}' does not exist", path.display())]
    ConfigFileMissing { path: PathBuf },

    /// A config file could not be parsed
    #[error("Failed to parse configuration file '{}': {reason}", path.display())]
    ConfigFileInvalid { path: PathBuf, reason: String },

    /// A config file name is not a safe relative path starting with '/'
    #[error("Invalid configuration file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: String },

    /// Sync settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(String),
}

impl SyncError {
    pub(crate) fn download(name: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::DownloadFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn install(name: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::InstallFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure came from the network side of the pipeline
    ///
    /// The CLI uses this to offer "retry or continue offline".
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::CatalogUnavailable(_) | SyncError::DownloadFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_names_file() {
        let err = SyncError::download("/a.json", "HTTP 404 Not Found");
        assert_eq!(
            err.to_string(),
            "Download of file /a.json failed: HTTP 404 Not Found"
        );
        assert!(err.is_network());
    }

    #[test]
    fn test_missing_file_message() {
        let err = SyncError::ConfigFileMissing {
            path: PathBuf::from("/docs/config/json/a.json"),
        };
        assert!(err.to_string().contains("/docs/config/json/a.json"));
        assert!(!err.is_network());
    }
}
