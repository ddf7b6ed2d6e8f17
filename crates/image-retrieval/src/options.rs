//! Per-retrieval options

use image_downloader::DownloadOptions;

/// Execution context completion and progress callbacks are delivered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackContext {
    /// The manager's serial main context
    #[default]
    Main,
    /// A blocking-pool worker
    Background,
    /// Whatever task produced the result
    Inline,
}

/// Options for a single retrieval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheOptions {
    /// Skip both cache tiers and download
    pub force_refresh: bool,
    /// Do not persist downloads to disk
    pub memory_only: bool,
    /// Decode pixels before delivering
    pub decode_eagerly: bool,
    pub low_priority: bool,
    pub callback_context: CallbackContext,
    pub scale: f32,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            memory_only: false,
            decode_eagerly: false,
            low_priority: false,
            callback_context: CallbackContext::Main,
            scale: 1.0,
        }
    }
}

impl CacheOptions {
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.memory_only = true;
        self
    }

    pub fn decode_eagerly(mut self) -> Self {
        self.decode_eagerly = true;
        self
    }

    pub fn low_priority(mut self) -> Self {
        self.low_priority = true;
        self
    }

    pub fn callback_context(mut self, context: CallbackContext) -> Self {
        self.callback_context = context;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub(crate) fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            decode_eagerly: self.decode_eagerly,
            scale: self.scale,
            low_priority: self.low_priority,
        }
    }
}
