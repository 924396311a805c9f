//! # Memory Cache Provider
//!
//! This module provides an in-process cache layer using Moka caching.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::debug;

use crate::cache::providers::CacheLayer;
use crate::cache::types::{CacheError, CacheResult};
use crate::resource::ResourceKey;

/// Memory cache layer, evicting by total byte size
#[derive(Clone)]
pub struct MemoryCache {
    /// Moka cache for storing entries
    cache: MokaCache<ResourceKey, Bytes>,
    /// Maximum size for this cache in bytes
    max_size: u64,
}

impl MemoryCache {
    /// Create a new memory cache with the specified size limit
    pub fn new(max_size_bytes: u64) -> Self {
        if max_size_bytes == 0 {
            panic!("Memory cache size must be greater than zero");
        }

        // Size based eviction
        let cache = MokaCache::builder()
            .weigher(|_k, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory cache created with size limit");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    /// Number of entries currently held, after pending maintenance
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait::async_trait]
impl CacheLayer for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn contains(&self, key: &ResourceKey) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &ResourceKey) -> CacheResult<Option<Bytes>> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: &ResourceKey, data: Bytes) -> CacheResult<()> {
        let size = data.len() as u64;

        // Moka would evict an entry heavier than the whole cache right away
        if size > self.max_size {
            return Err(CacheError::EntryTooLarge {
                layer: self.name().to_string(),
                key: key.clone(),
                size,
                max_size: self.max_size,
            });
        }

        self.cache.insert(key.clone(), data).await;
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
