//! In-memory tier

use async_trait::async_trait;
use image_codec::DecodedImage;
use moka::future::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cost-bounded key/value store for decoded images. Implementations may
/// evict entries at any time.
#[async_trait]
pub trait MemoryCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<DecodedImage>;

    async fn set(&self, key: &str, image: DecodedImage, cost: u32);

    async fn remove(&self, key: &str);

    async fn remove_all(&self);

    fn stats(&self) -> MemoryStats;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub entries: u64,
    /// Sum of entry costs
    pub weighted_size: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Total cost budget; zero means unbounded
    pub max_cost: u64,
}

#[derive(Clone)]
struct MemoryEntry {
    image: DecodedImage,
    cost: u32,
}

/// [`MemoryCache`] backed by a moka cache weighed by image cost
pub struct MokaMemoryCache {
    cache: Cache<String, MemoryEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MokaMemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let max_cost = if config.max_cost == 0 {
            u64::MAX
        } else {
            config.max_cost
        };

        let cache = Cache::builder()
            .max_capacity(max_cost)
            .weigher(|_key: &String, entry: &MemoryEntry| entry.cost.max(1))
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Apply pending evictions so counts are exact
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MokaMemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

#[async_trait]
impl MemoryCache for MokaMemoryCache {
    async fn get(&self, key: &str) -> Option<DecodedImage> {
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.image)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, image: DecodedImage, cost: u32) {
        self.cache
            .insert(key.to_string(), MemoryEntry { image, cost })
            .await;
    }

    async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    async fn remove_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            entries: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn image(size: u32) -> DecodedImage {
        DecodedImage::from_rgba(RgbaImage::new(size, size), 1.0)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = MokaMemoryCache::default();

        assert!(cache.get("a").await.is_none());
        cache.set("a", image(4), 16).await;

        let hit = cache.get("a").await.unwrap();
        assert_eq!(hit.width(), 4);

        cache.remove("a").await;
        assert!(cache.get("a").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let cache = MokaMemoryCache::default();
        cache.set("a", image(1), 1).await;
        cache.set("b", image(1), 1).await;

        cache.remove_all().await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_cost_budget_evicts() {
        let cache = MokaMemoryCache::new(MemoryCacheConfig { max_cost: 100 });
        for i in 0..10 {
            cache.set(&format!("k{}", i), image(5), 25).await;
        }
        cache.sync().await;

        let stats = cache.stats();
        assert!(stats.weighted_size <= 100);
        assert!(stats.entries <= 4);
    }
}
