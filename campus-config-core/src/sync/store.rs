//! Installed config version tracking (`config.lock`)
//!
//! The version store is the single source of truth for "what is
//! installed". It is read by the gate and the diff, and written only by
//! the installer (one batch per pass), the asset seeder and the debug reset.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::layout::{ConfigFileName, ConfigFileType};

/// A config file and the version installed locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileRecord {
    pub name: ConfigFileName,
    #[serde(rename = "type")]
    pub file_type: ConfigFileType,
    pub version: u64,
}

impl ConfigFileRecord {
    pub fn new(name: ConfigFileName, file_type: ConfigFileType, version: u64) -> Self {
        Self {
            name,
            file_type,
            version,
        }
    }
}

/// Persistent table of installed config versions
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// All records, sorted by name. Empty when nothing was ever installed.
    async fn get_config_versions(&self) -> Result<Vec<ConfigFileRecord>>;

    /// Upsert every record by name. Either all records commit or none do.
    async fn update_config_versions(&self, records: &[ConfigFileRecord]) -> Result<()>;

    /// Upsert records and replace the catalog stamp in the same write
    async fn update_config_versions_at(
        &self,
        records: &[ConfigFileRecord],
        last_updated_at: i64,
    ) -> Result<()>;

    /// `lastUpdatedAt` stamp of the installed catalog, `0` if never set
    async fn last_updated_at(&self) -> Result<i64>;

    async fn set_last_updated_at(&self, last_updated_at: i64) -> Result<()>;
}

/// On-disk shape of the version lock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionLock {
    /// API version for schema compatibility
    pub api_version: String,
    /// When this lock file was last written
    pub generated: String,
    /// Catalog stamp of the installed configuration
    #[serde(default)]
    pub last_updated_at: i64,
    /// Installed config files
    #[serde(default)]
    pub files: Vec<ConfigFileRecord>,
}

impl Default for VersionLock {
    fn default() -> Self {
        Self {
            api_version: "campus-config/v1".to_string(),
            generated: chrono::Utc::now().to_rfc3339(),
            last_updated_at: 0,
            files: Vec::new(),
        }
    }
}

impl VersionLock {
    /// Insert records with unseen names and overwrite the rest
    pub fn upsert(&mut self, records: &[ConfigFileRecord]) {
        for record in records {
            match self.files.iter_mut().find(|f| f.name == record.name) {
                Some(existing) => {
                    existing.file_type = record.file_type;
                    existing.version = record.version;
                }
                None => self.files.push(record.clone()),
            }
        }
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn get(&self, name: &ConfigFileName) -> Option<&ConfigFileRecord> {
        self.files.iter().find(|f| &f.name == name)
    }
}

/// Version store backed by a YAML lock file
///
/// Every write replaces the whole document through a temporary file in the
/// same directory followed by a rename.
pub struct FileVersionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<VersionLock> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VersionLock::default())
            }
            Err(e) => {
                return Err(SyncError::Persistence(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        serde_yaml_ng::from_str(&content).map_err(|e| {
            SyncError::Persistence(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }

    async fn save(&self, lock: &VersionLock) -> Result<()> {
        let mut lock = lock.clone();
        lock.generated = chrono::Utc::now().to_rfc3339();

        let content = serde_yaml_ng::to_string(&lock)
            .map_err(|e| SyncError::Persistence(format!("Failed to serialize lock: {e}")))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, content.as_bytes()))
            .await
            .map_err(|e| SyncError::Persistence(format!("Lock writer panicked: {e}")))?
    }

    async fn modify(&self, apply: impl FnOnce(&mut VersionLock)) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut lock = self.load().await?;
        apply(&mut lock);
        self.save(&lock).await
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let persistence = |e: std::io::Error| {
        SyncError::Persistence(format!("Failed to write {}: {e}", path.display()))
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(persistence)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(persistence)?;
    temp.write_all(bytes).map_err(persistence)?;
    temp.as_file().sync_all().map_err(persistence)?;
    temp.persist(path).map_err(|e| persistence(e.error))?;

    Ok(())
}

#[async_trait]
impl VersionStore for FileVersionStore {
    async fn get_config_versions(&self) -> Result<Vec<ConfigFileRecord>> {
        let mut files = self.load().await?.files;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn update_config_versions(&self, records: &[ConfigFileRecord]) -> Result<()> {
        self.modify(|lock| lock.upsert(records)).await?;
        tracing::debug!(
            "Committed {} version record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn update_config_versions_at(
        &self,
        records: &[ConfigFileRecord],
        last_updated_at: i64,
    ) -> Result<()> {
        self.modify(|lock| {
            lock.upsert(records);
            lock.last_updated_at = last_updated_at;
        })
        .await?;
        tracing::debug!(
            "Committed {} version record(s) at stamp {} to {}",
            records.len(),
            last_updated_at,
            self.path.display()
        );
        Ok(())
    }

    async fn last_updated_at(&self) -> Result<i64> {
        Ok(self.load().await?.last_updated_at)
    }

    async fn set_last_updated_at(&self, last_updated_at: i64) -> Result<()> {
        self.modify(|lock| lock.last_updated_at = last_updated_at)
            .await
    }
}

/// In-process version store
#[derive(Default)]
pub struct MemoryVersionStore {
    lock: Mutex<VersionLock>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ConfigFileRecord>) -> Self {
        let mut lock = VersionLock::default();
        lock.upsert(&records);
        Self {
            lock: Mutex::new(lock),
        }
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut VersionLock) -> T) -> Result<T> {
        let mut lock = self
            .lock
            .lock()
            .map_err(|_| SyncError::Persistence("Version store lock poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn get_config_versions(&self) -> Result<Vec<ConfigFileRecord>> {
        self.with_lock(|lock| lock.files.clone())
    }

    async fn update_config_versions(&self, records: &[ConfigFileRecord]) -> Result<()> {
        self.with_lock(|lock| lock.upsert(records))
    }

    async fn update_config_versions_at(
        &self,
        records: &[ConfigFileRecord],
        last_updated_at: i64,
    ) -> Result<()> {
        self.with_lock(|lock| {
            lock.upsert(records);
            lock.last_updated_at = last_updated_at;
        })
    }

    async fn last_updated_at(&self) -> Result<i64> {
        self.with_lock(|lock| lock.last_updated_at)
    }

    async fn set_last_updated_at(&self, last_updated_at: i64) -> Result<()> {
        self.with_lock(|lock| lock.last_updated_at = last_updated_at)
    }
}
