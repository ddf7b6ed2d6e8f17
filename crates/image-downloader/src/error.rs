//! Error types for the image downloader

use std::fmt;
use std::sync::Arc;

/// Terminal failure of a download. Cloneable so a single result can be
/// handed to every caller waiting on the same URL.
#[derive(Debug, Clone)]
pub enum DownloadError {
    InvalidUrl(String),
    /// The payload could not be decoded
    BadData { status: u16 },
    /// The server answered 304 and sent nothing to decode
    NotModified,
    Transport(Arc<reqwest::Error>),
    /// The caller's completion was dropped before the download finished
    Cancelled,
}

impl DownloadError {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, DownloadError::NotModified)
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            DownloadError::BadData { status } => {
                write!(f, "Bad image data (HTTP status {})", status)
            }
            DownloadError::NotModified => write!(f, "Not modified"),
            DownloadError::Transport(err) => write!(f, "HTTP error: {}", err),
            DownloadError::Cancelled => write!(f, "Download cancelled"),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DownloadError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Transport(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
