//! Sequential download of pending config files into the staging area
//!
//! Files are transferred one at a time in plan order. A failure aborts the
//! rest of the queue; files already staged by this pass stay where they are
//! and are never committed by it.

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, SyncError};
use crate::layout::ConfigLayout;
use crate::settings::SyncSettings;

use super::catalog::build_http_client;
use super::progress::{DownloadDescriptor, UpdateObserver};
use super::PendingUpdate;

/// Downloads pending updates into `<documents>/temp/config`
pub struct Downloader {
    client: reqwest::Client,
    layout: ConfigLayout,
    prefer_compressed: bool,
}

impl Downloader {
    pub fn new(settings: &SyncSettings, layout: ConfigLayout) -> Result<Self> {
        let client = build_http_client(settings.connect_timeout(), settings.read_timeout())
            .map_err(|e| SyncError::download("*", format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, layout, settings.prefer_compressed))
    }

    pub fn with_client(client: reqwest::Client, layout: ConfigLayout, prefer_compressed: bool) -> Self {
        Self {
            client,
            layout,
            prefer_compressed,
        }
    }

    /// Download every update in order, returning the completed descriptors
    pub async fn download_all(
        &self,
        updates: &[PendingUpdate],
        observer: &dyn UpdateObserver,
    ) -> Result<Vec<DownloadDescriptor>> {
        let total_size: u64 = updates.iter().map(|u| u.size).sum();
        observer.on_update_start(total_size, updates.len());

        tracing::info!(
            "Downloading {} configuration file(s), {} bytes",
            updates.len(),
            total_size
        );

        let mut completed = Vec::with_capacity(updates.len());
        for update in updates {
            match self.download_one(update, observer).await {
                Ok(descriptor) => completed.push(descriptor),
                Err(e) => {
                    tracing::warn!(
                        "Aborting update after {} of {} file(s): {}",
                        completed.len(),
                        updates.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(completed)
    }

    async fn download_one(
        &self,
        update: &PendingUpdate,
        observer: &dyn UpdateObserver,
    ) -> Result<DownloadDescriptor> {
        let name = update.name.as_str();
        let staged = self.layout.staged_path(&update.name);
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::download(name, e))?;
        }

        let compressed_url = update
            .compressed_url
            .as_deref()
            .filter(|_| self.prefer_compressed);
        let url = compressed_url.unwrap_or(&update.url);
        let write_path = match compressed_url {
            Some(_) => gzip_path(&staged),
            None => staged.clone(),
        };

        tracing::debug!(
            "Downloading {} v{} from {} to {:?}",
            name,
            update.new_version,
            url,
            write_path
        );

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::download(name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::download(name, format!("Status code: {status}")));
        }

        let mut descriptor = DownloadDescriptor {
            name: update.name.clone(),
            url: url.to_string(),
            status: status.as_u16(),
            content_length: response.content_length(),
            bytes_written: 0,
        };
        observer.on_download_start(&descriptor);

        let mut file = tokio::fs::File::create(&write_path)
            .await
            .map_err(|e| SyncError::download(name, e))?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SyncError::download(name, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::download(name, e))?;
            descriptor.bytes_written += chunk.len() as u64;
            observer.on_download_progress(&descriptor);
        }
        file.flush().await.map_err(|e| SyncError::download(name, e))?;
        drop(file);

        if compressed_url.is_some() {
            inflate(&write_path, &staged)
                .await
                .map_err(|e| SyncError::download(name, format!("Failed to decompress: {e}")))?;
        }

        if let Some(expected) = &update.digest {
            verify_digest(&staged, expected)
                .await
                .map_err(|reason| SyncError::download(name, reason))?;
        }

        // Report what actually landed on disk
        descriptor.bytes_written = tokio::fs::metadata(&staged)
            .await
            .map_err(|e| SyncError::download(name, e))?
            .len();
        observer.on_download_complete(&descriptor);

        tracing::debug!("Staged {} ({} bytes)", name, descriptor.bytes_written);
        Ok(descriptor)
    }
}

fn gzip_path(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".gz");
    PathBuf::from(os)
}

/// Decompress `source` into `dest` and remove `source`
async fn inflate(source: &Path, dest: &Path) -> std::io::Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let input = std::fs::File::open(&source)?;
        let mut decoder = flate2::read::GzDecoder::new(input);
        let mut output = std::fs::File::create(&dest)?;
        std::io::copy(&mut decoder, &mut output)?;
        std::fs::remove_file(&source)
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Verify the SHA256 digest (`sha256:<hex>`) of a staged file
async fn verify_digest(path: &Path, expected: &str) -> std::result::Result<(), String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Failed to read for verification: {e}"))?;
    let actual = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(format!(
            "Digest verification failed! Expected: {expected} Actual: {actual}"
        ));
    }

    Ok(())
}
