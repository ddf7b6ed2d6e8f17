//! File-based blob storage behind a serial I/O queue

use crate::error::{DiskCacheError, Result};
use crate::eviction;
use crate::grant::{ExecutionGrant, GrantEnd};
use crate::queue::{IoQueue, JobCancel};
use crate::types::{CacheCleaned, DiskCacheConfig, DiskEntry, DiskStats, SweepReport};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 16;

/// Result of a cancellable disk read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskRead {
    Hit(Vec<u8>),
    Miss,
    /// The read was cancelled before it reached the front of the queue
    Cancelled,
}

/// Flat directory of blobs named by the SHA-256 of their key.
///
/// Every filesystem operation goes through one [`IoQueue`], so no two disk
/// operations of the same store interleave. Cloning is cheap and shares the
/// queue.
#[derive(Clone)]
pub struct DiskStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: DiskCacheConfig,
    queue: IoQueue,
    cleaned_tx: broadcast::Sender<CacheCleaned>,
}

impl DiskStore {
    /// Create a store. Must be called from within a Tokio runtime. The
    /// directory is created lazily on first write.
    pub fn new(config: DiskCacheConfig) -> Self {
        let queue = IoQueue::new(config.directory.display().to_string());
        let (cleaned_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                queue,
                cleaned_tx,
            }),
        }
    }

    pub fn config(&self) -> &DiskCacheConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Path {
        &self.inner.config.directory
    }

    /// File name a key is stored under
    pub fn hash_for_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Full path a key is stored under
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.directory().join(Self::hash_for_key(key))
    }

    /// Subscribe to maintenance notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CacheCleaned> {
        self.inner.cleaned_tx.subscribe()
    }

    /// Persist a blob, replacing any previous one for the key
    pub async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let dir = self.directory().to_path_buf();
        let file_name = Self::hash_for_key(key);
        let size = data.len();

        self.inner
            .queue
            .submit(async move { write_blob(&dir, &file_name, &data).await })
            .await??;

        debug!(key = %key, size, "Stored blob on disk");
        Ok(())
    }

    /// Read a blob. IO failures other than a missing file are logged and
    /// reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for_key(key);
        match self.inner.queue.submit(read_blob(path)).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Disk read failed");
                None
            }
        }
    }

    /// Queue a read that is skipped entirely if `cancel` fires before it
    /// starts. The read is enqueued immediately.
    pub fn get_cancellable(
        &self,
        key: &str,
        cancel: JobCancel,
    ) -> impl std::future::Future<Output = DiskRead> + Send + 'static {
        let read = self
            .inner
            .queue
            .submit_cancellable(cancel, read_blob(self.path_for_key(key)));
        async move {
            match read.await {
                Some(Some(data)) => DiskRead::Hit(data),
                Some(None) => DiskRead::Miss,
                None => DiskRead::Cancelled,
            }
        }
    }

    /// Remove a blob. Missing files are not an error.
    pub async fn remove(&self, key: &str) {
        let path = self.path_for_key(key);
        let result = self
            .inner
            .queue
            .submit(async move { fs::remove_file(&path).await })
            .await;

        match result {
            Ok(Ok(())) => debug!(key = %key, "Removed blob from disk"),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to remove blob"),
            Err(e) => warn!(key = %key, error = %e, "Failed to remove blob"),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let path = self.path_for_key(key);
        self.inner
            .queue
            .submit(async move { fs::try_exists(&path).await.unwrap_or(false) })
            .await
            .unwrap_or(false)
    }

    /// Snapshot of every entry, enumerated inside the serial context
    pub async fn entries(&self) -> Result<Vec<DiskEntry>> {
        let dir = self.directory().to_path_buf();
        self.run_blocking(move || eviction::enumerate(&dir).collect())
            .await
    }

    /// Entry count and total size, without deleting anything
    pub async fn stats(&self) -> Result<DiskStats> {
        let dir = self.directory().to_path_buf();
        self.run_blocking(move || eviction::calculate_total_size(&dir))
            .await
    }

    pub async fn total_size(&self) -> Result<u64> {
        Ok(self.stats().await?.total_size)
    }

    /// Delete every blob by removing and recreating the directory
    pub async fn clear(&self) -> Result<()> {
        let dir = self.directory().to_path_buf();
        self.inner
            .queue
            .submit(async move {
                if let Err(e) = fs::remove_dir_all(&dir).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(dir = ?dir, error = %e, "Failed to remove cache directory");
                    }
                }
                fs::create_dir_all(&dir).await
            })
            .await??;

        info!(dir = ?self.directory(), "Cleared disk cache");
        Ok(())
    }

    /// Run the expiration and size-cap passes, then notify subscribers of
    /// the deleted files
    pub async fn clean_expired(&self) -> Result<SweepReport> {
        let dir = self.directory().to_path_buf();
        let max_age = self.inner.config.max_age;
        let max_total_size = self.inner.config.max_total_size;

        let report = self
            .run_blocking(move || eviction::sweep(&dir, max_age, max_total_size, Utc::now()))
            .await?;

        let deleted = report.deleted();
        if !deleted.is_empty() {
            info!(
                expired = report.expired.len(),
                evicted = report.evicted.len(),
                remaining_size = report.remaining_size,
                "Cleaned disk cache"
            );
            // No subscribers is fine
            let _ = self.inner.cleaned_tx.send(CacheCleaned {
                file_names: deleted,
            });
        }
        Ok(report)
    }

    /// Run [`clean_expired`](Self::clean_expired) under a finite execution
    /// grant. If the budget runs out first the grant is ended with
    /// [`GrantEnd::Expired`]; the sweep itself keeps running.
    pub fn clean_expired_in_background(
        &self,
        grant: ExecutionGrant,
    ) -> JoinHandle<Result<SweepReport>> {
        let grant = Arc::new(grant);

        let expiry = {
            let grant = Arc::clone(&grant);
            tokio::spawn(async move {
                tokio::time::sleep(grant.budget()).await;
                if grant.end(GrantEnd::Expired) {
                    warn!(budget = ?grant.budget(), "Execution grant expired before disk sweep finished");
                }
            })
        };

        let store = self.clone();
        tokio::spawn(async move {
            let report = store.clean_expired().await;
            expiry.abort();
            grant.end(GrantEnd::Completed);
            report
        })
    }

    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .queue
            .submit(async move { tokio::task::spawn_blocking(f).await })
            .await?
            .map_err(|e| DiskCacheError::from(std::io::Error::other(e)))
    }
}

async fn write_blob(dir: &Path, file_name: &str, data: &[u8]) -> std::io::Result<()> {
    // Idempotent; an existing directory is not an error
    fs::create_dir_all(dir).await?;

    let tmp = dir.join(format!(".{}.tmp", file_name));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, dir.join(file_name)).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn read_blob(path: PathBuf) -> Option<Vec<u8>> {
    match fs::read(&path).await {
        Ok(data) => Some(data),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to read cached blob");
            None
        }
    }
}
