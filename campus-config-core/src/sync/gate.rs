//! Readiness gate for installed configuration
//!
//! `init()` verifies that every recorded file is present on disk. Callers
//! arriving while a check is running attach to the same in-flight future,
//! so simultaneous consumers trigger exactly one verification pass.
//!
//! ```text
//! Uninitialized ──init()──▶ Initializing ──ok──▶ Ready
//!       ▲                        │                 │
//!       └─────────err────────────┘                 │
//!       └──────────────reset()─────────────────────┘
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, SyncError};
use crate::layout::{ConfigFileName, ConfigFileType, ConfigLayout};

use super::VersionStore;

type InitFlight = Shared<BoxFuture<'static, Result<()>>>;

/// Observable gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Uninitialized,
    Initializing,
    Ready,
}

enum GateState {
    Uninitialized,
    Initializing(InitFlight),
    Ready,
}

struct GateInner {
    state: GateState,
    // Bumped by reset() so a stale check cannot mark the gate ready
    generation: u64,
}

fn lock(inner: &Mutex<GateInner>) -> MutexGuard<'_, GateInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Gate that consumers await before reading config-derived data
pub struct ConfigGate {
    layout: ConfigLayout,
    store: Arc<dyn VersionStore>,
    inner: Arc<Mutex<GateInner>>,
}

impl ConfigGate {
    pub fn new(layout: ConfigLayout, store: Arc<dyn VersionStore>) -> Self {
        Self {
            layout,
            store,
            inner: Arc::new(Mutex::new(GateInner {
                state: GateState::Uninitialized,
                generation: 0,
            })),
        }
    }

    pub fn status(&self) -> GateStatus {
        match lock(&self.inner).state {
            GateState::Uninitialized => GateStatus::Uninitialized,
            GateState::Initializing(_) => GateStatus::Initializing,
            GateState::Ready => GateStatus::Ready,
        }
    }

    /// Resolve once the installed configuration is verified complete
    ///
    /// Never touches the network. On failure the gate returns to
    /// `Uninitialized` so a later call can retry.
    pub async fn init(&self) -> Result<()> {
        let flight = {
            let mut inner = lock(&self.inner);
            let in_flight = match &inner.state {
                GateState::Ready => return Ok(()),
                GateState::Initializing(flight) => Some(flight.clone()),
                GateState::Uninitialized => None,
            };

            match in_flight {
                Some(flight) => flight,
                None => {
                    let flight = self.start_verification(inner.generation);
                    inner.state = GateState::Initializing(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Force the next `init()` to verify again
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.state = GateState::Uninitialized;
    }

    fn start_verification(&self, generation: u64) -> InitFlight {
        let store = Arc::clone(&self.store);
        let layout = self.layout.clone();
        let inner = Arc::clone(&self.inner);

        async move {
            let result = verify_installation(store.as_ref(), &layout).await;
            {
                let mut inner = lock(&inner);
                if inner.generation == generation {
                    inner.state = match result {
                        Ok(()) => GateState::Ready,
                        Err(_) => GateState::Uninitialized,
                    };
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Read and parse a JSON config file such as `/university.json`
    pub async fn get_config(&self, name: &str) -> Result<serde_json::Value> {
        self.get_config_as(name).await
    }

    /// Read a JSON config file into a typed value
    pub async fn get_config_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.ready_path(ConfigFileType::Json, name).await?;
        let raw = read_installed(&path).await?;

        serde_json::from_str(&raw).map_err(|e| SyncError::ConfigFileInvalid {
            path,
            reason: e.to_string(),
        })
    }

    /// Read a text config file such as `/about.txt`
    pub async fn get_text_file(&self, name: &str) -> Result<String> {
        let path = self.ready_path(ConfigFileType::Text, name).await?;
        read_installed(&path).await
    }

    /// `file://` URL of an installed image; empty for `None`. No I/O.
    pub fn get_image_path(&self, name: Option<&str>) -> String {
        self.layout.image_path(name)
    }

    async fn ready_path(&self, file_type: ConfigFileType, name: &str) -> Result<PathBuf> {
        let name = ConfigFileName::parse(name)?;
        self.init().await?;
        Ok(self.layout.installed_path(file_type, &name))
    }
}

async fn read_installed(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SyncError::ConfigFileMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(SyncError::ConfigFileInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Check that every record with a non-zero version exists on disk
async fn verify_installation(store: &dyn VersionStore, layout: &ConfigLayout) -> Result<()> {
    let records = store.get_config_versions().await?;
    if records.is_empty() {
        return Err(SyncError::ConfigurationUnavailable(
            "Configuration versions were not found in the version store".to_string(),
        ));
    }

    let mut missing = Vec::new();
    for record in records.iter().filter(|r| r.version > 0) {
        let path = layout.installed_path(record.file_type, &record.name);
        let exists = tokio::fs::try_exists(&path).await.map_err(|e| {
            SyncError::ConfigurationUnavailable(format!("Failed to check {path:?}: {e}"))
        })?;

        if !exists {
            tracing::debug!("Could not find configuration file: {}", record.name);
            missing.push(record.name.as_str());
        }
    }

    if !missing.is_empty() {
        return Err(SyncError::ConfigurationUnavailable(format!(
            "Expected configuration file(s) do not exist: {}",
            missing.join(", ")
        )));
    }

    tracing::info!("Configuration verified: {} file(s)", records.len());
    Ok(())
}
