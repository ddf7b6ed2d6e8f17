//! Server configuration parsed from environment variables

use crate::error::Result;
use image_disk_cache::DiskCacheConfig;
use image_downloader::DownloaderConfig;
use image_retrieval::MemoryCacheConfig;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory the named cache directory is created under
    pub cache_root: PathBuf,
    pub cache_name: String,
    /// Zero disables the size cap
    pub max_disk_cache_size: u64,
    pub max_cache_age_secs: u64,
    /// Zero leaves the memory tier unbounded
    pub max_memory_cost: u64,
    /// Zero falls back to the downloader default
    pub download_timeout_secs: u64,
    pub trusted_hosts: HashSet<String>,
    /// Zero disables the periodic sweep
    pub sweep_interval_secs: u64,
    pub sweep_budget_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            cache_root: PathBuf::from("./cache"),
            cache_name: "default".to_string(),
            max_disk_cache_size: 0,
            max_cache_age_secs: 7 * 24 * 60 * 60, // 7 days
            max_memory_cost: 256 * 1024 * 1024,
            download_timeout_secs: 15,
            trusted_hosts: HashSet::new(),
            sweep_interval_secs: 60 * 60,
            sweep_budget_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source, falling back to
    /// defaults for missing or unparsable values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let cache_root = lookup("CACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_root);

        let cache_name = lookup("CACHE_NAME").unwrap_or(defaults.cache_name);

        let trusted_hosts = lookup("TRUSTED_HOSTS")
            .map(|s| {
                s.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.trusted_hosts);

        Self {
            port,
            cache_root,
            cache_name,
            max_disk_cache_size: number("MAX_DISK_CACHE_SIZE", defaults.max_disk_cache_size),
            max_cache_age_secs: number("MAX_CACHE_AGE_SECS", defaults.max_cache_age_secs),
            max_memory_cost: number("MAX_MEMORY_COST", defaults.max_memory_cost),
            download_timeout_secs: number("DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout_secs),
            trusted_hosts,
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            sweep_budget_secs: number("SWEEP_BUDGET_SECS", defaults.sweep_budget_secs),
        }
    }

    pub fn disk_config(&self) -> Result<DiskCacheConfig> {
        Ok(DiskCacheConfig::named(&self.cache_root, &self.cache_name)?
            .with_max_age(Duration::from_secs(self.max_cache_age_secs))
            .with_max_total_size(self.max_disk_cache_size))
    }

    pub fn memory_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            max_cost: self.max_memory_cost,
        }
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            timeout: Duration::from_secs(self.download_timeout_secs),
            trusted_hosts: self.trusted_hosts.clone(),
            ..Default::default()
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn sweep_budget(&self) -> Duration {
        Duration::from_secs(self.sweep_budget_secs)
    }
}
