//! Cancellation handle for one retrieval

use image_disk_cache::JobCancel;
use image_downloader::DownloadHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Handle returned by [`ImageManager::retrieve`](crate::ImageManager::retrieve).
///
/// Cancelling stops the pending disk read (if it has not started) and this
/// caller's interest in the download, and suppresses every later callback.
/// Cloning shares the same task.
#[derive(Debug, Clone, Default)]
pub struct RetrievalTask {
    state: Arc<TaskState>,
}

#[derive(Debug, Default)]
struct TaskState {
    cancelled: AtomicBool,
    disk_read: Mutex<Option<JobCancel>>,
    download: Mutex<Option<DownloadHandle>>,
}

impl RetrievalTask {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(read) = take(&self.state.disk_read) {
            read.cancel();
        }
        if let Some(download) = take(&self.state.download) {
            download.cancel();
        }
        debug!("Cancelled image retrieval");
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Attach the pending disk read. Cancelled immediately if the task
    /// already is.
    pub(crate) fn attach_disk_read(&self, read: JobCancel) {
        put(&self.state.disk_read, read);
        if self.is_cancelled() {
            if let Some(read) = take(&self.state.disk_read) {
                read.cancel();
            }
        }
    }

    pub(crate) fn attach_download(&self, download: DownloadHandle) {
        put(&self.state.download, download);
        if self.is_cancelled() {
            if let Some(download) = take(&self.state.download) {
                download.cancel();
            }
        }
    }
}

fn put<T>(slot: &Mutex<Option<T>>, value: T) {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}
