//! The configuration sync context
//!
//! One `ConfigSync` is built at startup and cloned into every consumer.
//! Clones share the gate, the pending plan and the update single-flight.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::error::{Result, SyncError};
use crate::layout::{ConfigFileName, ConfigFileType, ConfigLayout};
use crate::settings::SyncSettings;

use super::catalog::{CatalogSource, RemoteCatalog, RemoteCatalogClient};
use super::diff::{diff_since, UpdatePlan};
use super::downloader::Downloader;
use super::gate::{ConfigGate, GateStatus};
use super::installer::Installer;
use super::progress::{FanOut, ProgressBroadcaster, UpdateEvent, UpdateObserver};
use super::store::{ConfigFileRecord, FileVersionStore, VersionStore};

/// Name of the manifest inside a bundled asset directory
pub const BASE_CONFIG_FILE: &str = "base_config.json";

type UpdateFlight = Shared<BoxFuture<'static, Result<()>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Last computed plan, tagged so an update pass only clears the plan it ran
#[derive(Default)]
struct PlanSlot {
    plan: Option<UpdatePlan>,
    generation: u64,
}

impl PlanSlot {
    fn replace(&mut self, plan: Option<UpdatePlan>) {
        self.plan = plan;
        self.generation += 1;
    }
}

struct SyncInner {
    settings: SyncSettings,
    layout: ConfigLayout,
    store: Arc<dyn VersionStore>,
    catalog: Arc<dyn CatalogSource>,
    downloader: Downloader,
    installer: Installer,
    gate: ConfigGate,
    progress: ProgressBroadcaster,
    plan: Mutex<PlanSlot>,
    update_flight: Mutex<Option<UpdateFlight>>,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

/// Entry point for consumers of synced configuration
#[derive(Clone)]
pub struct ConfigSync {
    inner: Arc<SyncInner>,
}

impl ConfigSync {
    /// Build with a `config.lock` store and the HTTP catalog client
    pub fn new(settings: SyncSettings) -> Result<Self> {
        let layout = ConfigLayout::new(&settings.documents_dir);
        let store: Arc<dyn VersionStore> = Arc::new(FileVersionStore::new(layout.lock_path()));
        let catalog: Arc<dyn CatalogSource> = Arc::new(RemoteCatalogClient::new(&settings)?);
        Self::with_parts(settings, store, catalog)
    }

    /// Build with caller-supplied store and catalog source
    pub fn with_parts(
        settings: SyncSettings,
        store: Arc<dyn VersionStore>,
        catalog: Arc<dyn CatalogSource>,
    ) -> Result<Self> {
        let layout = ConfigLayout::new(&settings.documents_dir);
        let downloader = Downloader::new(&settings, layout.clone())?;
        let installer = Installer::new(layout.clone(), Arc::clone(&store));
        let gate = ConfigGate::new(layout.clone(), Arc::clone(&store));

        Ok(Self {
            inner: Arc::new(SyncInner {
                settings,
                layout,
                store,
                catalog,
                downloader,
                installer,
                gate,
                progress: ProgressBroadcaster::default(),
                plan: Mutex::new(PlanSlot::default()),
                update_flight: Mutex::new(None),
                last_check: Mutex::new(None),
            }),
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn layout(&self) -> &ConfigLayout {
        &self.inner.layout
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.inner.store
    }

    pub fn gate(&self) -> &ConfigGate {
        &self.inner.gate
    }

    pub fn status(&self) -> GateStatus {
        self.inner.gate.status()
    }

    // ------------------------------------------------------------------
    // Consumer API
    // ------------------------------------------------------------------

    pub async fn init(&self) -> Result<()> {
        self.inner.gate.init().await
    }

    pub async fn get_config(&self, name: &str) -> Result<serde_json::Value> {
        self.inner.gate.get_config(name).await
    }

    pub async fn get_config_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.inner.gate.get_config_as(name).await
    }

    pub async fn get_text_file(&self, name: &str) -> Result<String> {
        self.inner.gate.get_text_file(name).await
    }

    pub fn get_image_path(&self, name: Option<&str>) -> String {
        self.inner.gate.get_image_path(name)
    }

    /// Listen to progress of any update pass
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.progress.subscribe()
    }

    /// Fetch the catalog and remember which files are stale
    ///
    /// A catalog failure is returned as-is; it says nothing about whether
    /// an update exists.
    pub async fn is_config_update_available(&self) -> Result<bool> {
        *lock(&self.inner.last_check) = Some(Utc::now());

        tracing::debug!(
            "Checking {} for configuration updates",
            self.inner.catalog.describe()
        );
        let catalog = self.inner.catalog.fetch_catalog().await?;
        let local = self.inner.store.get_config_versions().await?;
        let installed_stamp = self.inner.store.last_updated_at().await?;

        let plan = diff_since(&local, &catalog, installed_stamp);
        let available = plan.update_available();
        tracing::info!(
            "{} configuration file(s) out of date ({} bytes)",
            plan.updates.len(),
            plan.total_size()
        );

        lock(&self.inner.plan).replace(Some(plan));
        Ok(available)
    }

    /// Plan computed by the last successful update check
    pub fn pending_plan(&self) -> Option<UpdatePlan> {
        lock(&self.inner.plan).plan.clone()
    }

    /// Whether the app should check for updates again
    pub fn should_check_for_update(&self) -> bool {
        match *lock(&self.inner.last_check) {
            None => true,
            Some(last) => (Utc::now() - last)
                .to_std()
                .map(|elapsed| elapsed >= self.inner.settings.update_check_interval())
                .unwrap_or(false),
        }
    }

    /// Download and install the pending plan, then re-verify the gate
    ///
    /// Resolves immediately when nothing is pending. Callers arriving while
    /// a pass is running share its outcome; only the caller that started
    /// the pass gets direct observer callbacks, everyone can `subscribe()`.
    pub async fn update_config(&self, observer: Arc<dyn UpdateObserver>) -> Result<()> {
        let flight = {
            let mut slot = lock(&self.inner.update_flight);
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining configuration update already in progress");
                    flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let flight = async move {
                        let result = run_update(&inner, observer).await;
                        *lock(&inner.update_flight) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Seed the config directory from a bundled asset tree
    ///
    /// The tree holds `base_config.json` plus `images/`, `json/` and `text/`
    /// subdirectories whose files are copied as-is.
    pub async fn setup_default_configuration(&self, assets_dir: &Path) -> Result<()> {
        let manifest_path = assets_dir.join(BASE_CONFIG_FILE);
        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| SyncError::install(BASE_CONFIG_FILE, e))?;
        let base = RemoteCatalog::from_json(&raw)
            .map_err(|e| SyncError::install(BASE_CONFIG_FILE, e))?;

        let layout = &self.inner.layout;
        layout
            .ensure_dirs()
            .await
            .map_err(|e| SyncError::install(BASE_CONFIG_FILE, e))?;

        let mut copied = 0usize;
        for file_type in ConfigFileType::ALL {
            let source_dir = assets_dir.join(file_type.subdirectory());
            let mut entries = match tokio::fs::read_dir(&source_dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SyncError::install(file_type.subdirectory(), e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SyncError::install(file_type.subdirectory(), e))?
            {
                let source = entry.path();
                if !source.is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let name = ConfigFileName::parse(format!("/{file_name}"))?;
                let dest = layout.installed_path(file_type, &name);

                tracing::debug!("Copying config file from {:?} to {:?}", source, dest);
                tokio::fs::copy(&source, &dest)
                    .await
                    .map_err(|e| SyncError::install(name.as_str(), e))?;
                copied += 1;
            }
        }

        let records: Vec<ConfigFileRecord> = base
            .entries
            .iter()
            .map(|e| ConfigFileRecord::new(e.name.clone(), e.file_type, e.version))
            .collect();
        self.inner
            .store
            .update_config_versions_at(&records, base.last_updated_at.unwrap_or(0))
            .await?;

        self.inner.gate.reset();
        tracing::info!(
            "Seeded default configuration: {} file(s) copied, {} version(s) recorded",
            copied,
            records.len()
        );
        Ok(())
    }

    /// Delete installed files and set every recorded version to 0
    ///
    /// The installed catalog stamp is reset with the versions, so the next
    /// check compares every file again.
    pub async fn clear_configuration(&self) -> Result<()> {
        let records = self.inner.store.get_config_versions().await?;
        let layout = &self.inner.layout;

        let mut cleared = Vec::with_capacity(records.len());
        for record in records {
            let path = layout.installed_path(record.file_type, &record.name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to delete {:?}: {}", path, e);
                }
            }
            cleared.push(ConfigFileRecord::new(record.name, record.file_type, 0));
        }

        self.inner
            .store
            .update_config_versions_at(&cleared, 0)
            .await?;

        match tokio::fs::remove_dir_all(layout.config_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove config directory: {}", e),
        }

        lock(&self.inner.plan).replace(None);
        self.inner.gate.reset();
        tracing::info!("Cleared {} configuration record(s)", cleared.len());
        Ok(())
    }
}

async fn run_update(inner: &SyncInner, observer: Arc<dyn UpdateObserver>) -> Result<()> {
    let (plan, generation) = {
        let slot = lock(&inner.plan);
        (slot.plan.clone(), slot.generation)
    };
    let Some(plan) = plan.filter(UpdatePlan::update_available) else {
        tracing::debug!("No pending configuration updates");
        return Ok(());
    };

    inner
        .layout
        .ensure_dirs()
        .await
        .map_err(|e| SyncError::install("config directories", e))?;

    let targets: Vec<&dyn UpdateObserver> = vec![observer.as_ref(), &inner.progress];
    let observers = FanOut::new(targets);
    inner
        .downloader
        .download_all(&plan.updates, &observers)
        .await?;
    let records = inner
        .installer
        .commit(&plan.updates, plan.last_updated_at)
        .await?;
    observers.on_installed(&records);

    {
        // A check that ran during this pass keeps its newer plan
        let mut slot = lock(&inner.plan);
        if slot.generation == generation {
            slot.replace(None);
        }
    }

    inner.gate.reset();
    inner.gate.init().await
}
