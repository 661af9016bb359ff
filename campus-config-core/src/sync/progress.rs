//! Update progress reporting
//!
//! The pipeline reports through [`UpdateObserver`]. The caller that starts
//! an update pass may pass its own observer; any number of other listeners
//! can follow along through [`ProgressBroadcaster::subscribe`].

use tokio::sync::broadcast;

use crate::layout::ConfigFileName;

use super::ConfigFileRecord;

/// Default number of buffered events per subscriber
const EVENT_CAPACITY: usize = 256;

/// State of one file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub name: ConfigFileName,
    pub url: String,
    /// HTTP status of the response
    pub status: u16,
    /// `Content-Length` of the response, when the server sent one
    pub content_length: Option<u64>,
    /// Bytes written so far; the on-disk size once complete
    pub bytes_written: u64,
}

/// Listener for update pass milestones
///
/// All methods default to no-ops so implementors pick what they need.
pub trait UpdateObserver: Send + Sync {
    /// Once per pass, before the first download
    fn on_update_start(&self, _total_size: u64, _total_files: usize) {}

    fn on_download_start(&self, _download: &DownloadDescriptor) {}

    /// Zero or more times per file, with `bytes_written` so far
    fn on_download_progress(&self, _download: &DownloadDescriptor) {}

    fn on_download_complete(&self, _download: &DownloadDescriptor) {}

    /// After the installer committed the batch
    fn on_installed(&self, _files: &[ConfigFileRecord]) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl UpdateObserver for NoopObserver {}

/// Progress as a stream of values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    UpdateStarted { total_size: u64, total_files: usize },
    DownloadStarted(DownloadDescriptor),
    DownloadProgress(DownloadDescriptor),
    DownloadCompleted(DownloadDescriptor),
    Installed { files: Vec<ConfigFileName> },
}

/// Re-publishes observer callbacks on a broadcast channel
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<UpdateEvent>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: UpdateEvent) {
        // No subscribers is the common case
        let _ = self.sender.send(event);
    }
}

impl UpdateObserver for ProgressBroadcaster {
    fn on_update_start(&self, total_size: u64, total_files: usize) {
        self.publish(UpdateEvent::UpdateStarted {
            total_size,
            total_files,
        });
    }

    fn on_download_start(&self, download: &DownloadDescriptor) {
        self.publish(UpdateEvent::DownloadStarted(download.clone()));
    }

    fn on_download_progress(&self, download: &DownloadDescriptor) {
        self.publish(UpdateEvent::DownloadProgress(download.clone()));
    }

    fn on_download_complete(&self, download: &DownloadDescriptor) {
        self.publish(UpdateEvent::DownloadCompleted(download.clone()));
    }

    fn on_installed(&self, files: &[ConfigFileRecord]) {
        self.publish(UpdateEvent::Installed {
            files: files.iter().map(|f| f.name.clone()).collect(),
        });
    }
}

/// Forwards every callback to several observers in order
pub(crate) struct FanOut<'a> {
    observers: Vec<&'a dyn UpdateObserver>,
}

impl<'a> FanOut<'a> {
    pub(crate) fn new(observers: Vec<&'a dyn UpdateObserver>) -> Self {
        Self { observers }
    }
}

impl UpdateObserver for FanOut<'_> {
    fn on_update_start(&self, total_size: u64, total_files: usize) {
        for observer in &self.observers {
            observer.on_update_start(total_size, total_files);
        }
    }

    fn on_download_start(&self, download: &DownloadDescriptor) {
        for observer in &self.observers {
            observer.on_download_start(download);
        }
    }

    fn on_download_progress(&self, download: &DownloadDescriptor) {
        for observer in &self.observers {
            observer.on_download_progress(download);
        }
    }

    fn on_download_complete(&self, download: &DownloadDescriptor) {
        for observer in &self.observers {
            observer.on_download_complete(download);
        }
    }

    fn on_installed(&self, files: &[ConfigFileRecord]) {
        for observer in &self.observers {
            observer.on_installed(files);
        }
    }
}
