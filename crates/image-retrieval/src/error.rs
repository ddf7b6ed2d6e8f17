//! Error types for image retrieval

use image_disk_cache::DiskCacheError;
use image_downloader::DownloadError;
use std::fmt;

#[derive(Debug)]
pub enum ImageError {
    /// Malformed URL or key
    InvalidRequest(String),
    /// Response bytes failed to decode
    BadData { status: u16 },
    /// The server answered 304; resolved from the cache before reaching callers
    NotModified,
    /// Network, timeout or TLS failure
    Transport(DownloadError),
    /// Disk read or write failure
    Io(DiskCacheError),
    /// The retrieval was cancelled or dropped before it produced a result
    Cancelled,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ImageError::BadData { status } => {
                write!(f, "Bad image data (HTTP status {})", status)
            }
            ImageError::NotModified => write!(f, "Not modified"),
            ImageError::Transport(err) => write!(f, "Transport error: {}", err),
            ImageError::Io(err) => write!(f, "Disk cache error: {}", err),
            ImageError::Cancelled => write!(f, "Retrieval cancelled"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Transport(err) => Some(err),
            ImageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DownloadError> for ImageError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::InvalidUrl(msg) => ImageError::InvalidRequest(msg),
            DownloadError::BadData { status } => ImageError::BadData { status },
            DownloadError::NotModified => ImageError::NotModified,
            err @ DownloadError::Transport(_) => ImageError::Transport(err),
            DownloadError::Cancelled => ImageError::Cancelled,
        }
    }
}

impl From<DiskCacheError> for ImageError {
    fn from(err: DiskCacheError) -> Self {
        ImageError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
