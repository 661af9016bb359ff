//! Configuration sync - keeping bundled config files current
//!
//! This module downloads newer versions of the app's configuration files
//! (JSON documents, text and images) from the update server, installs
//! them, and gates readers until the installed set is verified.
//!
//! # Overview
//!
//! - Track installed versions in `config.lock`
//! - Fetch the per-build catalog and compute which files are stale
//! - Download stale files into a staging area, then move them into place
//! - Commit all new versions in one batch after every move succeeded
//!
//! # Architecture
//!
//! ```text
//! Update server
//!     │
//!     └── /config/<app_version>  ← Catalog of files and versions
//!            │
//!            ▼
//!     diff (installed vs. catalog) → UpdatePlan
//!            │
//!            ▼
//!     <documents>/temp/config/   ← Staged downloads
//!            │
//!            ▼
//!     <documents>/config/{images,json,text}/  ← Installed files
//!     <documents>/config.lock                 ← Version tracking
//! ```

mod catalog;
mod context;
mod diff;
mod downloader;
mod gate;
mod installer;
mod progress;
mod store;

pub use catalog::{CatalogEntry, CatalogSource, RemoteCatalog, RemoteCatalogClient};
pub use context::{ConfigSync, BASE_CONFIG_FILE};
pub use diff::{diff, diff_since, format_update_size, update_message, PendingUpdate, UpdatePlan};
pub use downloader::Downloader;
pub use gate::{ConfigGate, GateStatus};
pub use installer::Installer;
pub use progress::{
    DownloadDescriptor, NoopObserver, ProgressBroadcaster, UpdateEvent, UpdateObserver,
};
pub use store::{ConfigFileRecord, FileVersionStore, MemoryVersionStore, VersionLock, VersionStore};

#[cfg(test)]
mod tests;
