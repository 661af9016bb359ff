//! Remote catalog fetching and parsing
//!
//! The update server publishes one catalog per app build at
//! `<server_url>/config/<app_version>`. Two document shapes are accepted:
//!
//! ```json
//! {
//!   "/university.json": { "type": "json", "version": 3, "size": 1024,
//!                         "location": { "url": "https://.../university.json" } }
//! }
//! ```
//!
//! ```json
//! {
//!   "lastUpdatedAt": 1507000000000,
//!   "whatsNew": { "en": "New bus routes", "fr": "Nouveaux trajets" },
//!   "files": [
//!     { "name": "/university.json", "type": "json", "version": 3,
//!       "size": 1024, "url": "https://.../university.json" }
//!   ]
//! }
//! ```
//!
//! Entry order in the document is preserved.

use async_trait::async_trait;
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::layout::{ConfigFileName, ConfigFileType};
use crate::settings::SyncSettings;

/// Latest available version of one config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: ConfigFileName,
    pub file_type: ConfigFileType,
    pub version: u64,
    /// Uncompressed size in bytes
    pub size: u64,
    pub url: String,
    /// gzip variant of the file, if the server offers one
    pub compressed_url: Option<String>,
    pub compressed_size: Option<u64>,
    /// `sha256:<hex>` of the uncompressed file
    pub digest: Option<String>,
}

/// Parsed catalog for one app build
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteCatalog {
    pub entries: Vec<CatalogEntry>,
    /// Milliseconds since epoch when the server last changed this catalog
    pub last_updated_at: Option<i64>,
    /// Release notes, either a string or a map of language → string
    pub whats_new: Option<serde_json::Value>,
}

impl RemoteCatalog {
    /// Parse a catalog document in either accepted shape
    pub fn from_json(content: &str) -> Result<Self> {
        let parse_error = |e: serde_json::Error| {
            SyncError::CatalogUnavailable(format!("Failed to parse catalog: {e}"))
        };

        // File names start with '/', so a top-level "files" key marks the detailed form
        let shape: CatalogShape = serde_json::from_str(content).map_err(parse_error)?;
        let document = if shape.files.is_some() {
            CatalogDocument::Detailed(serde_json::from_str(content).map_err(parse_error)?)
        } else {
            CatalogDocument::Keyed(serde_json::from_str(content).map_err(parse_error)?)
        };

        let catalog = match document {
            CatalogDocument::Detailed(detailed) => RemoteCatalog {
                entries: detailed.files.into_iter().map(Into::into).collect(),
                last_updated_at: detailed.last_updated_at,
                whats_new: detailed.whats_new,
            },
            CatalogDocument::Keyed(KeyedCatalog(entries)) => RemoteCatalog {
                entries: entries
                    .into_iter()
                    .map(|(name, entry)| entry.into_entry(name))
                    .collect(),
                last_updated_at: None,
                whats_new: None,
            },
        };

        let mut seen = HashSet::new();
        if let Some(dup) = catalog.entries.iter().find(|e| !seen.insert(&e.name)) {
            return Err(SyncError::CatalogUnavailable(format!(
                "Catalog lists {} more than once",
                dup.name
            )));
        }

        Ok(catalog)
    }

    pub fn get(&self, name: &ConfigFileName) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.name == name)
    }
}

/// Just enough of a document to tell the two forms apart
#[derive(Deserialize)]
struct CatalogShape {
    #[serde(default)]
    files: Option<IgnoredAny>,
}

enum CatalogDocument {
    Detailed(DetailedCatalog),
    Keyed(KeyedCatalog),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailedCatalog {
    #[serde(default)]
    last_updated_at: Option<i64>,
    #[serde(default)]
    whats_new: Option<serde_json::Value>,
    files: Vec<DetailedEntry>,
}

#[derive(Deserialize)]
struct DetailedEntry {
    name: ConfigFileName,
    #[serde(rename = "type")]
    file_type: ConfigFileType,
    version: u64,
    #[serde(default)]
    size: u64,
    url: String,
    #[serde(default)]
    zurl: Option<String>,
    #[serde(default)]
    zsize: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

impl From<DetailedEntry> for CatalogEntry {
    fn from(entry: DetailedEntry) -> Self {
        CatalogEntry {
            name: entry.name,
            file_type: entry.file_type,
            version: entry.version,
            size: entry.size,
            url: entry.url,
            compressed_url: entry.zurl,
            compressed_size: entry.zsize,
            digest: entry.digest,
        }
    }
}

#[derive(Deserialize)]
struct Location {
    url: String,
}

#[derive(Deserialize)]
struct KeyedEntry {
    #[serde(rename = "type")]
    file_type: ConfigFileType,
    version: u64,
    #[serde(default)]
    size: u64,
    location: Location,
    #[serde(default)]
    zlocation: Option<Location>,
    #[serde(default)]
    zsize: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

impl KeyedEntry {
    fn into_entry(self, name: ConfigFileName) -> CatalogEntry {
        CatalogEntry {
            name,
            file_type: self.file_type,
            version: self.version,
            size: self.size,
            url: self.location.url,
            compressed_url: self.zlocation.map(|l| l.url),
            compressed_size: self.zsize,
            digest: self.digest,
        }
    }
}

/// Keyed catalog, deserialized by hand so map order survives
struct KeyedCatalog(Vec<(ConfigFileName, KeyedEntry)>);

impl<'de> Deserialize<'de> for KeyedCatalog {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct KeyedCatalogVisitor;

        impl<'de> Visitor<'de> for KeyedCatalogVisitor {
            type Value = KeyedCatalog;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of config file names to catalog entries")
            }

            fn visit_map<M>(self, mut map: M) -> std::result::Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, entry)) = map.next_entry::<ConfigFileName, KeyedEntry>()? {
                    entries.push((name, entry));
                }
                Ok(KeyedCatalog(entries))
            }
        }

        deserializer.deserialize_map(KeyedCatalogVisitor)
    }
}

/// Source of the latest catalog
///
/// `RemoteCatalogClient` is the HTTP implementation; embedders and tests can
/// supply their own.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<RemoteCatalog>;

    /// Where the catalog comes from, for logs
    fn describe(&self) -> String;
}

/// Build the HTTP client shared by catalog fetches and downloads
pub(crate) fn build_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("campus-config/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
}

/// Fetches the catalog for the configured app build
pub struct RemoteCatalogClient {
    client: reqwest::Client,
    url: String,
    platform: String,
}

impl RemoteCatalogClient {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        let client = build_http_client(settings.connect_timeout(), settings.read_timeout())
            .map_err(|e| {
                SyncError::CatalogUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self::with_client(
            client,
            settings.catalog_url(),
            settings.platform.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, url: String, platform: String) -> Self {
        Self {
            client,
            url,
            platform,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CatalogSource for RemoteCatalogClient {
    async fn fetch_catalog(&self) -> Result<RemoteCatalog> {
        tracing::debug!("Fetching configuration catalog from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header("platform", &self.platform)
            .send()
            .await
            .map_err(|e| {
                SyncError::CatalogUnavailable(format!("Failed to fetch {}: {e}", self.url))
            })?;

        if !response.status().is_success() {
            return Err(SyncError::CatalogUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let content = response.text().await.map_err(|e| {
            SyncError::CatalogUnavailable(format!("Failed to read response body: {e}"))
        })?;

        let catalog = RemoteCatalog::from_json(&content)?;
        tracing::info!(
            "Fetched catalog from {}: {} file(s)",
            self.url,
            catalog.entries.len()
        );
        Ok(catalog)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
