//! Coalescing image downloader
//!
//! Deduplicates concurrent fetches of the same URL into a single network
//! operation, fans progress and completion out to every waiting caller, and
//! lets each caller cancel its own interest without disturbing the others.

mod downloader;
mod error;
mod types;

pub use downloader::{DownloadHandle, ImageDownloader};
pub use error::{DownloadError, Result};
pub use types::{
    CompletionFn, DownloadObserver, DownloadOptions, DownloadedImage, DownloaderConfig, ProgressFn, RequestModifier,
};
