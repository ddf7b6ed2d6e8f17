//! Retrieval results and request descriptors

use image_codec::DecodedImage;
use serde::Serialize;
use std::fmt;

/// Where a retrieved image came from. `None` means it was downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    None,
    Memory,
    Disk,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::None => "none",
            CacheType::Memory => "memory",
            CacheType::Disk => "disk",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloadable image and the key it is cached under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub cache_key: String,
    pub download_url: String,
}

impl Resource {
    pub fn new(cache_key: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            download_url: download_url.into(),
        }
    }

    /// A resource cached under its own URL
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            cache_key: url.clone(),
            download_url: url,
        }
    }
}

/// Successful outcome of a retrieval.
///
/// `image` is `None` only when the server answered 304 and nothing was
/// cached for the key.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub image: Option<DecodedImage>,
    pub source: CacheType,
    pub url: String,
}

/// Answer to [`ImageCache::is_cached`](crate::ImageCache::is_cached)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheCheckResult {
    pub cached: bool,
    pub source: CacheType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_from_url() {
        let resource = Resource::from_url("https://example.com/a.png");
        assert_eq!(resource.cache_key, "https://example.com/a.png");
        assert_eq!(resource.download_url, "https://example.com/a.png");
    }

    #[test]
    fn test_cache_type_display() {
        assert_eq!(CacheType::Memory.to_string(), "memory");
        assert_eq!(CacheType::None.as_str(), "none");
    }
}
