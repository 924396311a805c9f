//! # Cache Layer
//!
//! This module defines the trait every cache backend implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::CacheResult;
use crate::resource::ResourceKey;

/// A single storage backend holding opaque byte blobs keyed by [`ResourceKey`].
///
/// Implementations are responsible for their own consistency under concurrent
/// access; the layered cache holds no cross-layer lock.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Short label used in logs and aggregate errors
    fn name(&self) -> &str;

    /// Whether this layer refuses writes
    fn is_read_only(&self) -> bool {
        false
    }

    /// Check if the layer contains an entry for the given key
    async fn contains(&self, key: &ResourceKey) -> CacheResult<bool>;

    /// Get an entry from the layer, `None` on a miss
    async fn get(&self, key: &ResourceKey) -> CacheResult<Option<Bytes>>;

    /// Put an entry into the layer, replacing any previous value
    async fn put(&self, key: &ResourceKey, data: Bytes) -> CacheResult<()>;

    /// Remove an entry from the layer; a missing entry is not an error
    async fn remove(&self, key: &ResourceKey) -> CacheResult<()>;
}
