//! Comparing installed versions against the remote catalog

use std::collections::HashMap;

use crate::layout::{ConfigFileName, ConfigFileType};

use super::{CatalogEntry, ConfigFileRecord, RemoteCatalog};

/// A file whose remote version is newer than the installed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub name: ConfigFileName,
    pub file_type: ConfigFileType,
    pub url: String,
    pub size: u64,
    /// `0` when the file was never installed
    pub old_version: u64,
    pub new_version: u64,
    pub compressed_url: Option<String>,
    pub compressed_size: Option<u64>,
    pub digest: Option<String>,
}

impl PendingUpdate {
    fn from_entry(entry: &CatalogEntry, old_version: u64) -> Self {
        Self {
            name: entry.name.clone(),
            file_type: entry.file_type,
            url: entry.url.clone(),
            size: entry.size,
            old_version,
            new_version: entry.version,
            compressed_url: entry.compressed_url.clone(),
            compressed_size: entry.compressed_size,
            digest: entry.digest.clone(),
        }
    }

    /// Version record to commit once this file is installed
    pub fn record(&self) -> ConfigFileRecord {
        ConfigFileRecord::new(self.name.clone(), self.file_type, self.new_version)
    }
}

/// Result of comparing local records with a catalog
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatePlan {
    /// In catalog order
    pub updates: Vec<PendingUpdate>,
    pub last_updated_at: Option<i64>,
    pub whats_new: Option<serde_json::Value>,
}

impl UpdatePlan {
    pub fn update_available(&self) -> bool {
        !self.updates.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.updates.iter().map(|u| u.size).sum()
    }

    /// Release notes for a language, falling back to a plain string
    pub fn whats_new_text(&self, language: &str) -> String {
        match &self.whats_new {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Object(map)) => map
                .get(language)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }
}

/// Produce one `PendingUpdate` per catalog entry that is new or newer
pub fn diff(local: &[ConfigFileRecord], remote: &RemoteCatalog) -> UpdatePlan {
    let installed: HashMap<&ConfigFileName, u64> =
        local.iter().map(|r| (&r.name, r.version)).collect();

    let updates = remote
        .entries
        .iter()
        .filter_map(|entry| match installed.get(&entry.name) {
            None => Some(PendingUpdate::from_entry(entry, 0)),
            Some(&version) if entry.version > version => {
                Some(PendingUpdate::from_entry(entry, version))
            }
            Some(_) => None,
        })
        .collect();

    UpdatePlan {
        updates,
        last_updated_at: remote.last_updated_at,
        whats_new: remote.whats_new.clone(),
    }
}

/// Like [`diff`], but a catalog stamped no later than the installed
/// configuration yields an empty plan
///
/// A cleared record (version 0) always forces the per-file comparison, so
/// a reset configuration is offered again whatever the stamps say.
pub fn diff_since(
    local: &[ConfigFileRecord],
    remote: &RemoteCatalog,
    installed_last_updated_at: i64,
) -> UpdatePlan {
    let cleared = local.iter().any(|r| r.version == 0);

    match remote.last_updated_at {
        Some(stamp) if !cleared && stamp <= installed_last_updated_at => {
            tracing::debug!(
                "Catalog stamp {} is not newer than installed {}",
                stamp,
                installed_last_updated_at
            );
            UpdatePlan {
                updates: Vec::new(),
                last_updated_at: remote.last_updated_at,
                whats_new: remote.whats_new.clone(),
            }
        }
        _ => diff(local, remote),
    }
}

const MEGABYTE: u64 = 1_000_000;
const KILOBYTE: u64 = 1_000;

/// Human readable download size: `512 B`, `1.50 KB`, `2.25 MB`
pub fn format_update_size(size: u64) -> String {
    if size > MEGABYTE {
        format!("{:.2} MB", size as f64 / MEGABYTE as f64)
    } else if size > KILOBYTE {
        format!("{:.2} KB", size as f64 / KILOBYTE as f64)
    } else {
        format!("{size} B")
    }
}

/// Fill an "update available" prompt
///
/// `{1}` becomes the formatted size and `{2}` the release notes (prefixed
/// with a space), using `default_whats_new` when none were published.
pub fn update_message(
    template: &str,
    update_size: u64,
    whats_new: &str,
    default_whats_new: &str,
) -> String {
    let whats_new = if whats_new.is_empty() {
        default_whats_new
    } else {
        whats_new
    };

    template
        .replacen("{1}", &format_update_size(update_size), 1)
        .replacen("{2}", &format!(" {whats_new}"), 1)
}
