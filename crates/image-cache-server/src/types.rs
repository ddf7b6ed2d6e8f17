//! Request and response types for the HTTP front-end

use image_disk_cache::{DiskStats, SweepReport};
use image_retrieval::MemoryStats;
use serde::{Deserialize, Serialize};

/// Query string of `GET /image`
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: String,
    /// Cache key; defaults to the URL
    pub key: Option<String>,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub memory_only: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub memory: MemoryStats,
    pub in_flight_downloads: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheSizeResponse {
    pub entries: usize,
    pub total_size: u64,
}

impl From<DiskStats> for CacheSizeResponse {
    fn from(stats: DiskStats) -> Self {
        Self {
            entries: stats.entries,
            total_size: stats.total_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub expired: usize,
    pub evicted: usize,
    pub remaining_size: u64,
}

impl From<&SweepReport> for CleanResponse {
    fn from(report: &SweepReport) -> Self {
        Self {
            expired: report.expired.len(),
            evicted: report.evicted.len(),
            remaining_size: report.remaining_size,
        }
    }
}
