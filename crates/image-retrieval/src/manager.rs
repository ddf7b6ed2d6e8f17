//! Retrieval orchestration: memory, then disk, then network

use crate::cache::{CacheLookup, ImageCache};
use crate::dispatch::{dispatch, MainContext};
use crate::error::{ImageError, Result};
use crate::memory::{MemoryCacheConfig, MokaMemoryCache};
use crate::options::{CacheOptions, CallbackContext};
use crate::task::RetrievalTask;
use crate::types::{CacheType, Resource, Retrieved};
use image_codec::{ImageCodec, StandardCodec};
use image_disk_cache::{DiskCacheConfig, DiskStore, JobCancel};
use image_downloader::{
    DownloadError, DownloadedImage, DownloaderConfig, ImageDownloader, ProgressFn,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// Called with `(received_bytes, expected_total)` while downloading
pub type RetrieveProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Called at most once with the result of a retrieval
pub type RetrieveCompletionFn = Box<dyn FnOnce(Result<Retrieved>) + Send>;

/// Held from a cache miss until the download is stored back
type KeyGate = Arc<AsyncMutex<()>>;

/// Front door for image retrieval. Cloning is cheap and shares the cache,
/// the downloader and the main context.
#[derive(Clone)]
pub struct ImageManager {
    inner: Arc<Inner>,
}

struct Inner {
    cache: ImageCache,
    downloader: ImageDownloader,
    main: MainContext,
    gates: Mutex<HashMap<String, KeyGate>>,
}

impl Inner {
    fn lock_gates(&self) -> MutexGuard<'_, HashMap<String, KeyGate>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gate(&self, key: &str) -> KeyGate {
        Arc::clone(self.lock_gates().entry(key.to_string()).or_default())
    }

    /// Forget the gate once nobody but the table holds it
    fn release_gate(&self, key: &str, gate: KeyGate) {
        let mut gates = self.lock_gates();
        if Arc::strong_count(&gate) == 2 {
            gates.remove(key);
        }
    }
}

/// Completion bound to its task and callback context
struct Delivery {
    task: RetrievalTask,
    main: MainContext,
    context: CallbackContext,
    completion: RetrieveCompletionFn,
}

impl Delivery {
    fn complete(self, result: Result<Retrieved>) {
        let Delivery {
            task,
            main,
            context,
            completion,
        } = self;
        if task.is_cancelled() {
            debug!("Dropping result of cancelled retrieval");
            return;
        }
        dispatch(
            &main,
            context,
            Box::new(move || {
                if !task.is_cancelled() {
                    completion(result);
                }
            }),
        );
    }
}

impl ImageManager {
    pub fn new(cache: ImageCache, downloader: ImageDownloader, main: MainContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                downloader,
                main,
                gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Manager with the standard codec, a moka memory tier and a main
    /// context driven by a Tokio task. Must be called from within a Tokio
    /// runtime.
    pub fn with_config(
        disk: DiskCacheConfig,
        memory: MemoryCacheConfig,
        downloader: DownloaderConfig,
    ) -> Result<Self> {
        let codec: Arc<dyn ImageCodec> = Arc::new(StandardCodec::new());
        let cache = ImageCache::new(
            Arc::new(MokaMemoryCache::new(memory)),
            DiskStore::new(disk),
            Arc::clone(&codec),
        );
        let downloader = ImageDownloader::new(downloader, codec)?;
        Ok(Self::new(cache, downloader, MainContext::spawn()))
    }

    pub fn cache(&self) -> &ImageCache {
        &self.inner.cache
    }

    pub fn downloader(&self) -> &ImageDownloader {
        &self.inner.downloader
    }

    /// Retrieve an image, trying memory, then disk, then the network.
    ///
    /// Downloads are stored back into the cache before `completion` runs.
    /// A caller that misses while another retrieval of the same key is
    /// downloading waits for it and is answered from the cache, so one key
    /// costs one network request. Callbacks are delivered on
    /// `options.callback_context` and never after the returned task is
    /// cancelled. Must be called from within a Tokio runtime.
    pub fn retrieve(
        &self,
        resource: &Resource,
        options: CacheOptions,
        progress: Option<RetrieveProgressFn>,
        completion: RetrieveCompletionFn,
    ) -> RetrievalTask {
        let task = RetrievalTask::new();
        let delivery = Delivery {
            task: task.clone(),
            main: self.inner.main.clone(),
            context: options.callback_context,
            completion,
        };

        let manager = self.clone();
        let resource = resource.clone();
        tokio::spawn(async move {
            if options.force_refresh {
                let result = manager
                    .download_and_cache(&resource, options, progress, &delivery.task)
                    .await;
                delivery.complete(result);
                return;
            }

            if let Some(result) = manager.lookup(&resource, options, &delivery.task).await {
                delivery.complete(Ok(result));
                return;
            }
            if delivery.task.is_cancelled() {
                return;
            }

            let gate = manager.inner.gate(&resource.cache_key);
            let result = {
                let _turn = gate.lock().await;
                manager.resolve_miss(&resource, options, progress, &delivery.task).await
            };
            manager.inner.release_gate(&resource.cache_key, gate);

            if let Some(result) = result {
                delivery.complete(result);
            }
        });

        task
    }

    /// [`retrieve`](Self::retrieve) a resource cached under its own URL
    pub fn retrieve_url(
        &self,
        url: &str,
        options: CacheOptions,
        progress: Option<RetrieveProgressFn>,
        completion: RetrieveCompletionFn,
    ) -> RetrievalTask {
        self.retrieve(&Resource::from_url(url), options, progress, completion)
    }

    /// Retrieve and wait for the result. Dropping the future cancels the
    /// retrieval.
    pub async fn fetch(&self, resource: &Resource, options: CacheOptions) -> Result<Retrieved> {
        let (tx, rx) = oneshot::channel();
        let task = self.retrieve(
            resource,
            options.callback_context(CallbackContext::Inline),
            None,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let mut guard = CancelOnDrop(Some(task));
        let result = rx.await;
        guard.0 = None;

        // The completion is only dropped unrun when the retrieval was torn down
        result.map_err(|_| ImageError::Cancelled)?
    }

    /// Memory, then disk. The disk read is attached to `task` so cancelling
    /// skips it if it has not started.
    async fn lookup(
        &self,
        resource: &Resource,
        options: CacheOptions,
        task: &RetrievalTask,
    ) -> Option<Retrieved> {
        let read = JobCancel::new();
        task.attach_disk_read(read.clone());

        let lookup = self
            .inner
            .cache
            .retrieve(&resource.cache_key, options.decode_eagerly, options.scale, read)
            .await;
        match lookup {
            CacheLookup::Hit(image, source) => Some(Retrieved {
                image: Some(image),
                source,
                url: resource.download_url.clone(),
            }),
            CacheLookup::Cancelled => {
                debug!(key = %resource.cache_key, "Disk read cancelled before it ran");
                None
            }
            CacheLookup::Miss => None,
        }
    }

    /// Runs while holding the key's gate. A previous holder may have stored
    /// the image already, so the cache is checked again before downloading.
    /// `None` when the task was cancelled.
    async fn resolve_miss(
        &self,
        resource: &Resource,
        options: CacheOptions,
        progress: Option<RetrieveProgressFn>,
        task: &RetrievalTask,
    ) -> Option<Result<Retrieved>> {
        if task.is_cancelled() {
            return None;
        }
        if let Some(result) = self.lookup(resource, options, task).await {
            return Some(Ok(result));
        }
        if task.is_cancelled() {
            return None;
        }
        Some(self.download_and_cache(resource, options, progress, task).await)
    }

    async fn download_and_cache(
        &self,
        resource: &Resource,
        options: CacheOptions,
        progress: Option<RetrieveProgressFn>,
        task: &RetrievalTask,
    ) -> Result<Retrieved> {
        let progress =
            progress.map(|progress| self.progress_sink(task, options.callback_context, progress));

        let (tx, rx) = oneshot::channel();
        let handle = self.inner.downloader.fetch(
            &resource.download_url,
            &options.download_options(),
            progress,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        task.attach_download(handle);

        // The downloader drops the completion of a cancelled waiter
        let result = rx.await.unwrap_or(Err(DownloadError::Cancelled));
        self.finish_download(resource, options, result, task).await
    }

    async fn finish_download(
        &self,
        resource: &Resource,
        options: CacheOptions,
        result: std::result::Result<DownloadedImage, DownloadError>,
        task: &RetrievalTask,
    ) -> Result<Retrieved> {
        match result {
            Ok(downloaded) => {
                if let Err(e) = self
                    .inner
                    .cache
                    .store_image(
                        &downloaded.image,
                        Some(&downloaded.data),
                        &resource.cache_key,
                        !options.memory_only,
                    )
                    .await
                {
                    warn!(key = %resource.cache_key, error = %e, "Failed to persist downloaded image");
                }
                Ok(Retrieved {
                    image: Some(downloaded.image),
                    source: CacheType::None,
                    url: resource.download_url.clone(),
                })
            }
            Err(DownloadError::NotModified) => {
                // The cached copy is still current
                match self.lookup(resource, options, task).await {
                    Some(result) => Ok(result),
                    None => {
                        debug!(key = %resource.cache_key, "Not modified but nothing cached");
                        Ok(Retrieved {
                            image: None,
                            source: CacheType::None,
                            url: resource.download_url.clone(),
                        })
                    }
                }
            }
            Err(e) => {
                debug!(url = %resource.download_url, error = %e, "Image download failed");
                Err(e.into())
            }
        }
    }

    fn progress_sink(
        &self,
        task: &RetrievalTask,
        context: CallbackContext,
        progress: RetrieveProgressFn,
    ) -> ProgressFn {
        let task = task.clone();
        let main = self.inner.main.clone();
        Arc::new(move |received, total| {
            if task.is_cancelled() {
                return;
            }
            let task = task.clone();
            let progress = Arc::clone(&progress);
            dispatch(
                &main,
                context,
                Box::new(move || {
                    if !task.is_cancelled() {
                        progress(received, total);
                    }
                }),
            );
        })
    }
}

struct CancelOnDrop(Option<RetrievalTask>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.cancel();
        }
    }
}
