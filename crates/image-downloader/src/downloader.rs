//! Download coordinator
//!
//! At most one network operation runs per URL. Every caller asking for a URL
//! that is already loading is attached to the existing load as a waiter and
//! receives the same progress updates and terminal result.

use crate::error::{DownloadError, Result};
use crate::types::{
    CompletionFn, DownloadOptions, DownloadedImage, DownloaderConfig, ProgressFn,
};
use image_codec::ImageCodec;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use url::Url;

const NOT_MODIFIED: u16 = 304;

struct Waiter {
    id: u64,
    progress: Option<ProgressFn>,
    completion: CompletionFn,
}

/// In-flight state shared by every caller waiting on one URL
struct FetchLoad {
    generation: u64,
    data: Vec<u8>,
    waiters: Vec<Waiter>,
    decode_eagerly: bool,
    scale: f32,
    abort: Option<AbortHandle>,
}

struct Inner {
    client: Client,
    trusted_client: Option<Client>,
    config: DownloaderConfig,
    codec: Arc<dyn ImageCodec>,
    low_priority: Arc<Semaphore>,
    loads: Mutex<HashMap<Url, FetchLoad>>,
    next_id: AtomicU64,
}

/// Coalescing image downloader. Cloning is cheap and shares the load table.
#[derive(Clone)]
pub struct ImageDownloader {
    inner: Arc<Inner>,
}

/// Handle to one caller's interest in a download
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    target: Option<HandleTarget>,
}

#[derive(Debug, Clone)]
struct HandleTarget {
    downloader: Weak<Inner>,
    url: Url,
    generation: u64,
    waiter_id: u64,
}

impl DownloadHandle {
    fn detached() -> Self {
        Self { target: None }
    }

    /// Stop this caller from receiving any further callbacks. The network
    /// operation is aborted only when no other caller is still waiting.
    pub fn cancel(&self) {
        let Some(target) = &self.target else {
            return;
        };
        let Some(inner) = target.downloader.upgrade() else {
            return;
        };

        let mut loads = inner.lock_loads();
        let Some(load) = loads.get_mut(&target.url) else {
            return;
        };
        if load.generation != target.generation {
            return;
        }

        load.waiters.retain(|w| w.id != target.waiter_id);
        if load.waiters.is_empty() {
            if let Some(abort) = load.abort.take() {
                abort.abort();
            }
            loads.remove(&target.url);
            debug!(url = %target.url, "Aborted download with no remaining waiters");
        }
    }
}

impl ImageDownloader {
    pub fn new(config: DownloaderConfig, codec: Arc<dyn ImageCodec>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        let trusted_client = if config.trusted_hosts.is_empty() {
            None
        } else {
            Some(
                Client::builder()
                    .user_agent(config.user_agent.clone())
                    .danger_accept_invalid_certs(true)
                    .build()?,
            )
        };

        let low_priority = Arc::new(Semaphore::new(config.low_priority_limit.max(1)));

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                trusted_client,
                config,
                codec,
                low_priority,
                loads: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    /// Number of URLs with a network operation in flight
    pub fn in_flight(&self) -> usize {
        self.inner.lock_loads().len()
    }

    pub fn is_loading(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|url| self.inner.lock_loads().contains_key(&url))
            .unwrap_or(false)
    }

    /// Start or join the download of `url`.
    ///
    /// `completion` runs exactly once unless the returned handle is
    /// cancelled first. Callbacks run on the network task, never while the
    /// load table is locked. Must be called from within a Tokio runtime.
    pub fn fetch(
        &self,
        url: &str,
        options: &DownloadOptions,
        progress: Option<ProgressFn>,
        completion: CompletionFn,
    ) -> DownloadHandle {
        let url = match parse_url(url) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Rejected download request");
                completion(Err(e));
                return DownloadHandle::detached();
            }
        };

        let waiter_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let waiter = Waiter {
            id: waiter_id,
            progress,
            completion,
        };

        let mut loads = self.inner.lock_loads();
        let generation = match loads.get_mut(&url) {
            Some(load) => {
                load.waiters.push(waiter);
                debug!(url = %url, waiters = load.waiters.len(), "Joined in-flight download");
                load.generation
            }
            None => {
                let generation = waiter_id;
                let task = tokio::spawn(run_load(
                    Arc::clone(&self.inner),
                    url.clone(),
                    generation,
                    options.low_priority,
                ));
                loads.insert(
                    url.clone(),
                    FetchLoad {
                        generation,
                        data: Vec::new(),
                        waiters: vec![waiter],
                        decode_eagerly: options.decode_eagerly,
                        scale: options.scale,
                        abort: Some(task.abort_handle()),
                    },
                );
                debug!(url = %url, "Started download");
                generation
            }
        };
        drop(loads);

        DownloadHandle {
            target: Some(HandleTarget {
                downloader: Arc::downgrade(&self.inner),
                url,
                generation,
                waiter_id,
            }),
        }
    }

    /// Download `url` and wait for the result
    pub async fn download(&self, url: &str, options: &DownloadOptions) -> Result<DownloadedImage> {
        let (tx, rx) = oneshot::channel();
        let _handle = self.fetch(
            url,
            options,
            None,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| DownloadError::Cancelled)?
    }
}

impl Inner {
    /// Every access to the load table, reads included, is exclusive
    fn lock_loads(&self) -> MutexGuard<'_, HashMap<Url, FetchLoad>> {
        self.loads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_trusted_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.config.trusted_hosts.contains(host))
    }

    fn client_for(&self, url: &Url) -> &Client {
        match &self.trusted_client {
            Some(client) if self.is_trusted_host(url) => client,
            _ => &self.client,
        }
    }

    /// Stream the response body into the load. Returns the HTTP status.
    async fn transfer(&self, url: &Url, generation: u64) -> Result<u16> {
        let mut request = self
            .client_for(url)
            .get(url.clone())
            .timeout(self.config.effective_timeout());
        if let Some(modifier) = &self.config.request_modifier {
            request = modifier(request);
        }

        let mut response = request.send().await?;
        let status = response.status().as_u16();
        let total = response.content_length();

        while let Some(chunk) = response.chunk().await? {
            let Some((received, listeners)) = self.append_chunk(url, generation, &chunk) else {
                // Load was cancelled or replaced; nobody is listening
                break;
            };
            for progress in listeners {
                progress(received, total);
            }
        }

        Ok(status)
    }

    /// Append a chunk and snapshot the progress callbacks to invoke
    fn append_chunk(&self, url: &Url, generation: u64, chunk: &[u8]) -> Option<(u64, Vec<ProgressFn>)> {
        let mut loads = self.lock_loads();
        let load = loads.get_mut(url).filter(|load| load.generation == generation)?;
        load.data.extend_from_slice(chunk);

        let listeners = load
            .waiters
            .iter()
            .filter_map(|w| w.progress.clone())
            .collect();
        Some((load.data.len() as u64, listeners))
    }

    /// Take the accumulated body and decode options. The load stays in the
    /// table so late callers still join it while decoding runs.
    fn take_body(&self, url: &Url, generation: u64) -> Option<(Vec<u8>, bool, f32)> {
        let mut loads = self.lock_loads();
        let load = loads.get_mut(url).filter(|load| load.generation == generation)?;
        Some((std::mem::take(&mut load.data), load.decode_eagerly, load.scale))
    }

    /// Remove the load and deliver `result` to every waiter. A load that is
    /// already gone is a no-op.
    fn finish(&self, url: &Url, generation: u64, result: Result<DownloadedImage>) {
        let waiters = {
            let mut loads = self.lock_loads();
            match loads.get(url) {
                Some(load) if load.generation == generation => {
                    loads.remove(url).map(|load| load.waiters).unwrap_or_default()
                }
                _ => return,
            }
        };

        if let (Ok(downloaded), Some(observer)) = (&result, &self.config.on_downloaded) {
            observer(downloaded);
        }

        match &result {
            Ok(downloaded) => debug!(
                url = %url,
                size = downloaded.data.len(),
                waiters = waiters.len(),
                "Download finished"
            ),
            Err(e) => warn!(url = %url, error = %e, waiters = waiters.len(), "Download failed"),
        }

        for waiter in waiters {
            (waiter.completion)(result.clone());
        }
    }
}

async fn run_load(inner: Arc<Inner>, url: Url, generation: u64, low_priority: bool) {
    let _permit = if low_priority {
        Arc::clone(&inner.low_priority).acquire_owned().await.ok()
    } else {
        None
    };

    let status = match inner.transfer(&url, generation).await {
        Ok(status) => status,
        Err(e) => {
            inner.finish(&url, generation, Err(e));
            return;
        }
    };

    let Some((data, decode_eagerly, scale)) = inner.take_body(&url, generation) else {
        return;
    };

    let codec = Arc::clone(&inner.codec);
    let image_url = url.clone();
    let decoded = tokio::task::spawn_blocking(move || {
        decode_payload(codec.as_ref(), data, status, decode_eagerly, scale, image_url)
    })
    .await;

    let result = match decoded {
        Ok(result) => result,
        Err(e) => {
            warn!(url = %url, error = %e, "Decode task failed");
            Err(DownloadError::BadData { status })
        }
    };
    inner.finish(&url, generation, result);
}

fn decode_payload(
    codec: &dyn ImageCodec,
    data: Vec<u8>,
    status: u16,
    decode_eagerly: bool,
    scale: f32,
    url: Url,
) -> Result<DownloadedImage> {
    let Some(image) = codec.decode(&data, scale) else {
        if status == NOT_MODIFIED {
            return Err(DownloadError::NotModified);
        }
        return Err(DownloadError::BadData { status });
    };

    let image = if decode_eagerly {
        codec.decompress(&image, scale).unwrap_or(image)
    } else {
        image
    };

    Ok(DownloadedImage {
        image,
        data: Arc::from(data),
        url,
        status,
    })
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(DownloadError::InvalidUrl(format!(
            "unsupported scheme {}: {}",
            scheme, url
        ))),
    }
}
