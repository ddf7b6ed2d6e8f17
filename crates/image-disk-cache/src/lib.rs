//! Disk tier of the image cache
//!
//! Stores blobs in one flat directory, named by the SHA-256 of their key,
//! with every filesystem operation serialized through a single I/O queue.
//! Maintenance sweeps remove entries older than the configured maximum age
//! and reclaim space oldest-first once the total size exceeds its cap.

mod error;
pub mod eviction;
mod grant;
mod queue;
mod store;
mod types;

pub use error::{DiskCacheError, Result};
pub use grant::{ExecutionGrant, GrantEnd};
pub use queue::{IoQueue, JobCancel};
pub use store::{DiskRead, DiskStore};
pub use types::{CacheCleaned, DiskCacheConfig, DiskEntry, DiskStats, SweepReport};
