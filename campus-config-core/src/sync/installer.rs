//! Moving staged files into place and committing their versions
//!
//! Moves happen in plan order. Version records are written in a single
//! batch only after every move succeeded, so a failed pass never advances
//! the version table. Files moved before a failure are not rolled back;
//! the next pass re-downloads and overwrites them.

use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::layout::ConfigLayout;

use super::{ConfigFileRecord, PendingUpdate, VersionStore};

/// Commits staged downloads to `<documents>/config`
pub struct Installer {
    layout: ConfigLayout,
    store: Arc<dyn VersionStore>,
}

impl Installer {
    pub fn new(layout: ConfigLayout, store: Arc<dyn VersionStore>) -> Self {
        Self { layout, store }
    }

    /// Install every staged update and record the new versions
    ///
    /// `last_updated_at` is the catalog stamp to persist with the batch.
    pub async fn commit(
        &self,
        updates: &[PendingUpdate],
        last_updated_at: Option<i64>,
    ) -> Result<Vec<ConfigFileRecord>> {
        let mut records = Vec::with_capacity(updates.len());

        for update in updates {
            self.move_into_place(update).await?;
            records.push(update.record());
        }

        match last_updated_at {
            Some(stamp) => {
                self.store
                    .update_config_versions_at(&records, stamp)
                    .await?
            }
            None => self.store.update_config_versions(&records).await?,
        }

        let staging = self.layout.staging_dir();
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staging directory {:?}: {}", staging, e);
            }
        }

        tracing::info!("Installed {} configuration file(s)", records.len());
        Ok(records)
    }

    async fn move_into_place(&self, update: &PendingUpdate) -> Result<()> {
        let name = update.name.as_str();
        let staged = self.layout.staged_path(&update.name);
        let target = self.layout.installed_path(update.file_type, &update.name);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::install(name, e))?;
        }

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::install(name, e)),
        }

        tokio::fs::rename(&staged, &target)
            .await
            .map_err(|e| SyncError::install(name, format!("Failed to move {staged:?}: {e}")))?;

        tracing::debug!(
            "Moved {} v{} (was v{}) to {:?}",
            name,
            update.new_version,
            update.old_version,
            target
        );
        Ok(())
    }
}
