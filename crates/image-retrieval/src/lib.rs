//! Image retrieval with a memory tier, a disk tier and a coalescing
//! downloader behind one manager.
//!
//! A retrieval checks memory, then disk, then the network. Downloads are
//! stored back into both tiers. Every retrieval returns a
//! [`RetrievalTask`] that can be cancelled independently of other callers
//! waiting on the same URL.

mod cache;
mod dispatch;
mod error;
mod manager;
mod memory;
mod options;
mod task;
mod types;

pub use cache::{CacheLookup, ImageCache};
pub use dispatch::{MainContext, MainQueue};
pub use error::{ImageError, Result};
pub use manager::{ImageManager, RetrieveCompletionFn, RetrieveProgressFn};
pub use memory::{MemoryCache, MemoryCacheConfig, MemoryStats, MokaMemoryCache};
pub use options::{CacheOptions, CallbackContext};
pub use task::RetrievalTask;
pub use types::{CacheCheckResult, CacheType, Resource, Retrieved};
