//! Filesystem layout for installed and staged config files
//!
//! ```text
//! <documents>/
//!     ├── config/
//!     │   ├── images/   ← committed image files
//!     │   ├── json/     ← committed JSON documents
//!     │   └── text/     ← committed text files
//!     ├── temp/config/  ← staging area while a pass downloads
//!     └── config.lock   ← installed versions (FileVersionStore)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// Category of a config file, deciding its subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFileType {
    Image,
    Json,
    Text,
}

impl ConfigFileType {
    pub const ALL: [ConfigFileType; 3] = [
        ConfigFileType::Image,
        ConfigFileType::Json,
        ConfigFileType::Text,
    ];

    /// Subdirectory of `config/` holding files of this type
    pub fn subdirectory(&self) -> &'static str {
        match self {
            ConfigFileType::Image => "images",
            ConfigFileType::Json => "json",
            ConfigFileType::Text => "text",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFileType::Image => "image",
            ConfigFileType::Json => "json",
            ConfigFileType::Text => "text",
        }
    }

    /// Reverse of [`subdirectory`](Self::subdirectory), used when seeding from assets
    pub fn from_subdirectory(dir: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.subdirectory() == dir)
    }
}

impl fmt::Display for ConfigFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated config file name such as `/university.json`
///
/// Names always start with `/` and are resolved relative to a type
/// directory, so they may not contain empty, `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigFileName(String);

impl ConfigFileName {
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| SyncError::InvalidFileName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        let Some(relative) = name.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        if relative.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if relative.contains('\\') || relative.contains('\0') {
            return Err(invalid("contains a forbidden character"));
        }
        if relative
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid("contains an empty, '.' or '..' segment"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without its leading `/`, safe to join onto a directory
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }
}

impl TryFrom<String> for ConfigFileName {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ConfigFileName> for String {
    fn from(name: ConfigFileName) -> Self {
        name.0
    }
}

impl fmt::Display for ConfigFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves every path the sync pipeline touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    documents_dir: PathBuf,
}

impl ConfigLayout {
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn config_dir(&self) -> PathBuf {
        self.documents_dir.join("config")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.documents_dir.join("temp").join("config")
    }

    /// Default location of the YAML version lock
    pub fn lock_path(&self) -> PathBuf {
        self.documents_dir.join("config.lock")
    }

    pub fn type_dir(&self, file_type: ConfigFileType) -> PathBuf {
        self.config_dir().join(file_type.subdirectory())
    }

    /// Final location of a committed file
    pub fn installed_path(&self, file_type: ConfigFileType, name: &ConfigFileName) -> PathBuf {
        self.type_dir(file_type).join(name.relative())
    }

    /// Location of a file while it is being downloaded
    pub fn staged_path(&self, name: &ConfigFileName) -> PathBuf {
        self.staging_dir().join(name.relative())
    }

    /// `file://` URL of an image, or the empty string when no name is given
    pub fn image_path(&self, name: Option<&str>) -> String {
        match name {
            None => String::new(),
            Some(name) => format!(
                "file://{}/{}/{}",
                self.config_dir().display(),
                ConfigFileType::Image.subdirectory(),
                name.trim_start_matches('/')
            ),
        }
    }

    /// Create the config type directories and the staging directory
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for file_type in ConfigFileType::ALL {
            tokio::fs::create_dir_all(self.type_dir(file_type)).await?;
        }
        tokio::fs::create_dir_all(self.staging_dir()).await
    }
}
