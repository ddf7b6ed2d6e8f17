//! Two-tier image cache: memory in front of disk

use crate::error::Result;
use crate::memory::{MemoryCache, MemoryStats};
use crate::types::{CacheCheckResult, CacheType};
use image_codec::{DecodedImage, ImageCodec, ImageFormat};
use image_disk_cache::{
    CacheCleaned, DiskRead, DiskStats, DiskStore, ExecutionGrant, JobCancel, SweepReport,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(DecodedImage, CacheType),
    Miss,
    /// The disk read was cancelled before it ran
    Cancelled,
}

/// Memory tier, disk tier and the codec that moves images between them.
/// Cloning is cheap.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

struct Inner {
    memory: Arc<dyn MemoryCache>,
    disk: DiskStore,
    codec: Arc<dyn ImageCodec>,
}

impl ImageCache {
    pub fn new(memory: Arc<dyn MemoryCache>, disk: DiskStore, codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory,
                disk,
                codec,
            }),
        }
    }

    pub fn disk(&self) -> &DiskStore {
        &self.inner.disk
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.inner.memory.stats()
    }

    pub fn hash_for_key(key: &str) -> String {
        DiskStore::hash_for_key(key)
    }

    /// Subscribe to disk maintenance notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CacheCleaned> {
        self.inner.disk.subscribe()
    }

    /// Store an image in memory and, if `to_disk`, on disk.
    ///
    /// The disk copy is re-encoded in the format sniffed from `original`;
    /// payloads of unknown format are persisted as the original bytes. An
    /// image with neither original bytes nor a known format is kept in
    /// memory only.
    pub async fn store_image(
        &self,
        image: &DecodedImage,
        original: Option<&[u8]>,
        key: &str,
        to_disk: bool,
    ) -> Result<()> {
        self.inner
            .memory
            .set(key, image.clone(), image.cost())
            .await;

        if !to_disk {
            return Ok(());
        }

        let Some(data) = self.disk_payload(image, original) else {
            debug!(key = %key, "Nothing to persist for image");
            return Ok(());
        };
        self.inner.disk.put(key, data).await?;
        Ok(())
    }

    fn disk_payload(&self, image: &DecodedImage, original: Option<&[u8]>) -> Option<Vec<u8>> {
        let format = match original {
            Some(bytes) => self.inner.codec.sniff_format(bytes),
            None => image.format(),
        };

        match format {
            ImageFormat::Unknown => original.map(<[u8]>::to_vec),
            format => self
                .inner
                .codec
                .encode(image, format)
                .or_else(|| original.map(<[u8]>::to_vec)),
        }
    }

    pub async fn remove_image(&self, key: &str, from_disk: bool) {
        self.inner.memory.remove(key).await;
        if from_disk {
            self.inner.disk.remove(key).await;
        }
    }

    pub async fn retrieve_from_memory(&self, key: &str) -> Option<DecodedImage> {
        self.inner.memory.get(key).await
    }

    /// Read and decode a disk entry without promoting it to memory
    pub async fn retrieve_from_disk(&self, key: &str, scale: f32) -> Option<DecodedImage> {
        let data = self.inner.disk.get(key).await?;
        self.decode(key, data, false, scale).await
    }

    /// Look a key up in memory, then on disk.
    ///
    /// With `decode_eagerly` every hit is pixel-decoded before it is
    /// returned. A disk hit is promoted into memory without being written
    /// back to disk. If `cancel` fires before the disk read starts the read
    /// never runs.
    pub async fn retrieve(
        &self,
        key: &str,
        decode_eagerly: bool,
        scale: f32,
        cancel: JobCancel,
    ) -> CacheLookup {
        if let Some(image) = self.inner.memory.get(key).await {
            debug!(key = %key, "Memory cache hit");
            let image = if decode_eagerly && !image.is_decompressed() {
                self.decompress(key, image, scale).await
            } else {
                image
            };
            return CacheLookup::Hit(image, CacheType::Memory);
        }

        let data = match self.inner.disk.get_cancellable(key, cancel).await {
            DiskRead::Hit(data) => data,
            DiskRead::Miss => return CacheLookup::Miss,
            DiskRead::Cancelled => return CacheLookup::Cancelled,
        };

        match self.decode(key, data, decode_eagerly, scale).await {
            Some(image) => {
                debug!(key = %key, "Disk cache hit");
                self.inner
                    .memory
                    .set(key, image.clone(), image.cost())
                    .await;
                CacheLookup::Hit(image, CacheType::Disk)
            }
            None => CacheLookup::Miss,
        }
    }

    /// Whether a key is cached, and in which tier
    pub async fn is_cached(&self, key: &str) -> CacheCheckResult {
        if self.inner.memory.get(key).await.is_some() {
            return CacheCheckResult {
                cached: true,
                source: CacheType::Memory,
            };
        }
        if self.inner.disk.exists(key).await {
            return CacheCheckResult {
                cached: true,
                source: CacheType::Disk,
            };
        }
        CacheCheckResult {
            cached: false,
            source: CacheType::None,
        }
    }

    /// Drop every in-memory entry; the response to memory pressure
    pub async fn clear_memory(&self) {
        self.inner.memory.remove_all().await;
        debug!("Cleared memory cache");
    }

    pub async fn clear_disk(&self) -> Result<()> {
        Ok(self.inner.disk.clear().await?)
    }

    pub async fn clean_expired(&self) -> Result<SweepReport> {
        Ok(self.inner.disk.clean_expired().await?)
    }

    pub fn clean_expired_in_background(
        &self,
        grant: ExecutionGrant,
    ) -> JoinHandle<image_disk_cache::Result<SweepReport>> {
        self.inner.disk.clean_expired_in_background(grant)
    }

    pub async fn disk_stats(&self) -> Result<DiskStats> {
        Ok(self.inner.disk.stats().await?)
    }

    pub async fn disk_size(&self) -> Result<u64> {
        Ok(self.inner.disk.total_size().await?)
    }

    /// Pixel-decode an image, falling back to the undecoded value
    async fn decompress(&self, key: &str, image: DecodedImage, scale: f32) -> DecodedImage {
        let codec = Arc::clone(&self.inner.codec);
        let source = image.clone();
        match tokio::task::spawn_blocking(move || codec.decompress(&source, scale)).await {
            Ok(Some(decompressed)) => decompressed,
            Ok(None) => image,
            Err(e) => {
                warn!(key = %key, error = %e, "Decode task failed");
                image
            }
        }
    }

    async fn decode(
        &self,
        key: &str,
        data: Vec<u8>,
        decode_eagerly: bool,
        scale: f32,
    ) -> Option<DecodedImage> {
        let codec = Arc::clone(&self.inner.codec);
        let decoded = tokio::task::spawn_blocking(move || {
            let image = codec.decode(&data, scale)?;
            if decode_eagerly {
                codec.decompress(&image, scale)
            } else {
                Some(image)
            }
        })
        .await;

        match decoded {
            Ok(Some(image)) => Some(image),
            Ok(None) => {
                warn!(key = %key, "Cached blob failed to decode");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Decode task failed");
                None
            }
        }
    }
}
