//! Downloader configuration and result types

use crate::error::DownloadError;
use image_codec::DecodedImage;
use reqwest::RequestBuilder;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_LOW_PRIORITY_LIMIT: usize = 2;
const DEFAULT_USER_AGENT: &str = concat!("image-downloader/", env!("CARGO_PKG_VERSION"));

/// Called with `(received_bytes, expected_total)` as chunks arrive
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Called exactly once with the terminal result of a download
pub type CompletionFn = Box<dyn FnOnce(Result<DownloadedImage, DownloadError>) + Send>;

/// Hook applied to every outgoing request, e.g. to add conditional headers
pub type RequestModifier = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;

/// Notified once per successful network load, before any waiter's
/// completion runs. Receives the decoded image with its URL and status.
pub type DownloadObserver = Arc<dyn Fn(&DownloadedImage) + Send + Sync>;

/// Configuration for an [`ImageDownloader`](crate::ImageDownloader)
#[derive(Clone)]
pub struct DownloaderConfig {
    /// Per-request timeout; zero falls back to 15 seconds
    pub timeout: Duration,
    /// Hosts whose server certificates are accepted without validation
    pub trusted_hosts: HashSet<String>,
    /// Concurrent network slots shared by low-priority downloads
    pub low_priority_limit: usize,
    pub user_agent: String,
    pub request_modifier: Option<RequestModifier>,
    pub on_downloaded: Option<DownloadObserver>,
}

impl DownloaderConfig {
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            trusted_hosts: HashSet::new(),
            low_priority_limit: DEFAULT_LOW_PRIORITY_LIMIT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_modifier: None,
            on_downloaded: None,
        }
    }
}

impl fmt::Debug for DownloaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloaderConfig")
            .field("timeout", &self.timeout)
            .field("trusted_hosts", &self.trusted_hosts)
            .field("low_priority_limit", &self.low_priority_limit)
            .field("user_agent", &self.user_agent)
            .field("request_modifier", &self.request_modifier.is_some())
            .field("on_downloaded", &self.on_downloaded.is_some())
            .finish()
    }
}

/// Per-request download options. For coalesced requests only the first
/// caller's `decode_eagerly` and `scale` are used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadOptions {
    pub decode_eagerly: bool,
    pub scale: f32,
    pub low_priority: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            decode_eagerly: false,
            scale: 1.0,
            low_priority: false,
        }
    }
}

/// A successfully downloaded and decoded image
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub image: DecodedImage,
    /// Raw response body
    pub data: Arc<[u8]>,
    pub url: Url,
    pub status: u16,
}
