//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

#![allow(dead_code)]

use campus_config_core::SyncSettings;
use std::path::Path;
use std::sync::Once;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const APP_VERSION: &str = "1.0.0";
pub const PLATFORM: &str = "test-os";

/// Catalog path requested for `APP_VERSION`
pub fn catalog_path() -> String {
    format!("/config/{APP_VERSION}")
}

/// Settings pointing at a mock server and a temporary documents directory
pub fn test_settings(server_url: &str, documents_dir: &Path) -> SyncSettings {
    SyncSettings {
        server_url: server_url.to_string(),
        app_version: APP_VERSION.to_string(),
        platform: PLATFORM.to_string(),
        documents_dir: documents_dir.to_path_buf(),
        ..SyncSettings::default()
    }
}

/// Detailed catalog document listing `(name, type, version, body)` files
/// served under `/files<name>`
pub fn catalog_json(server_url: &str, last_updated_at: i64, files: &[(&str, &str, u64, &str)]) -> String {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(name, file_type, version, body)| {
            serde_json::json!({
                "name": name,
                "type": file_type,
                "version": version,
                "size": body.len(),
                "url": format!("{server_url}/files{name}"),
            })
        })
        .collect();

    serde_json::json!({
        "lastUpdatedAt": last_updated_at,
        "whatsNew": { "en": "New bus routes", "fr": "Nouveaux trajets" },
        "files": files,
    })
    .to_string()
}
