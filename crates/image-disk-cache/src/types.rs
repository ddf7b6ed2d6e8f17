//! Cache types

use crate::error::{DiskCacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DIRECTORY_PREFIX: &str = "image-cache.";
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7); // 7 days

/// One stored blob on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskEntry {
    pub path: PathBuf,
    /// File name, i.e. the hash of the key the blob was stored under
    pub file_name: String,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Configuration for a disk cache instance
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Flat directory holding every blob of this instance
    pub directory: PathBuf,
    /// Entries last modified longer ago than this are expired
    pub max_age: Duration,
    /// Soft cap on the total size in bytes, zero means unlimited
    pub max_total_size: u64,
}

impl DiskCacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_age: DEFAULT_MAX_AGE,
            max_total_size: 0,
        }
    }

    /// Config for a named cache living under `root`
    pub fn named(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(DiskCacheError::InvalidName(
                "cache name must not be empty".to_string(),
            ));
        }
        if name.contains(['/', '\\']) {
            return Err(DiskCacheError::InvalidName(format!(
                "cache name must not contain path separators: {}",
                name
            )));
        }
        Ok(Self::new(
            root.as_ref().join(format!("{}{}", DIRECTORY_PREFIX, name)),
        ))
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.max_total_size = max_total_size;
        self
    }
}

/// Statistics about the disk cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub entries: usize,
    pub total_size: u64,
}

/// Emitted once per maintenance sweep that deleted at least one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCleaned {
    /// Names of the deleted files (key hashes)
    pub file_names: Vec<String>,
}

/// Outcome of a maintenance sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub evicted: Vec<String>,
    /// Total size of the entries left after the sweep
    pub remaining_size: u64,
}

impl SweepReport {
    /// All deleted file names, expired first
    pub fn deleted(&self) -> Vec<String> {
        self.expired
            .iter()
            .chain(self.evicted.iter())
            .cloned()
            .collect()
    }
}
