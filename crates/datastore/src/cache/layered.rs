//! # Layered Cache
//!
//! This module provides the cache that composes several layers. Reads scan the
//! layers in order and back-fill earlier layers on a hit; writes fan out to
//! every writable layer.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::providers::CacheLayer;
use crate::cache::types::{CacheError, CacheResult, LayerFailure, LayerPolicy};
use crate::resource::ResourceKey;

#[derive(Clone)]
struct Layer {
    cache: Arc<dyn CacheLayer>,
    policy: LayerPolicy,
}

/// Ordered cache layers, fastest first
#[derive(Clone, Default)]
pub struct LayeredCache {
    layers: Vec<Layer>,
}

impl LayeredCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Read-only layers are never written to.
    pub fn add_layer(&mut self, layer: impl CacheLayer + 'static) {
        let policy = if layer.is_read_only() {
            LayerPolicy::read_only()
        } else {
            LayerPolicy::default()
        };
        self.add_layer_with_policy(Arc::new(layer), policy);
    }

    /// Append a layer with an explicit write policy.
    pub fn add_layer_with_policy(&mut self, layer: Arc<dyn CacheLayer>, mut policy: LayerPolicy) {
        if layer.is_read_only() {
            policy.writable = false;
        }
        debug!(layer = layer.name(), ?policy, "Added cache layer");
        self.layers.push(Layer {
            cache: layer,
            policy,
        });
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.cache.name()).collect()
    }

    /// True if at least one layer holds `key`. Layer errors count as absence.
    pub async fn contains(&self, key: &ResourceKey) -> bool {
        for layer in &self.layers {
            match layer.cache.contains(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(layer = layer.cache.name(), key = %key, error = %e, "Cache layer lookup failed");
                }
            }
        }
        false
    }

    /// Whether the layer at `index` holds `key`; out-of-range indices hold nothing.
    pub async fn contains_in_layer(&self, index: usize, key: &ResourceKey) -> CacheResult<bool> {
        match self.layers.get(index) {
            Some(layer) => layer.cache.contains(key).await,
            None => Ok(false),
        }
    }

    /// First copy of `key` found scanning front to back, back-filling every earlier
    /// writable layer. Read and back-fill failures are logged and skipped.
    pub async fn lookup(&self, key: &ResourceKey) -> Option<Bytes> {
        for (index, layer) in self.layers.iter().enumerate() {
            let data = match layer.cache.get(key).await {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    warn!(layer = layer.cache.name(), key = %key, error = %e, "Cache layer read failed");
                    continue;
                }
            };

            debug!(layer = layer.cache.name(), key = %key, "Cache hit");
            self.backfill(&self.layers[..index], key, &data).await;
            return Some(data);
        }

        debug!(key = %key, "Cache miss");
        None
    }

    /// Like [`lookup`](Self::lookup), failing with `NotFound` when no layer holds `key`.
    pub async fn get(&self, key: &ResourceKey) -> CacheResult<Bytes> {
        self.lookup(key)
            .await
            .ok_or_else(|| CacheError::NotFound(key.clone()))
    }

    async fn backfill(&self, earlier: &[Layer], key: &ResourceKey, data: &Bytes) {
        let writes = earlier
            .iter()
            .filter(|layer| layer.policy.writable)
            .map(|layer| async move {
                if let Err(e) = layer.cache.put(key, data.clone()).await {
                    warn!(layer = layer.cache.name(), key = %key, error = %e, "Failed to back-fill cache layer");
                }
            });
        join_all(writes).await;
    }

    /// Write `data` to every writable layer.
    ///
    /// Layers that succeeded are kept even when others fail. The call fails with an
    /// aggregate [`CacheError::Write`] if a critical layer failed or if no writable
    /// layer succeeded; any other failure is only logged.
    pub async fn set(&self, key: &ResourceKey, data: Bytes) -> CacheResult<()> {
        let writable: Vec<&Layer> = self.layers.iter().filter(|l| l.policy.writable).collect();
        if writable.is_empty() {
            return Ok(());
        }

        let results = join_all(
            writable
                .iter()
                .map(|layer| layer.cache.put(key, data.clone())),
        )
        .await;

        let mut failures = Vec::new();
        let mut critical_failed = false;
        for (layer, result) in writable.iter().zip(results) {
            if let Err(e) = result {
                warn!(layer = layer.cache.name(), key = %key, error = %e, "Failed to write cache layer");
                critical_failed |= layer.policy.critical;
                failures.push(LayerFailure {
                    layer: layer.cache.name().to_string(),
                    message: e.to_string(),
                });
            }
        }

        if critical_failed || failures.len() == writable.len() {
            return Err(CacheError::Write { failures });
        }
        Ok(())
    }

    /// Best-effort removal from every writable layer. Absence is not an error.
    pub async fn delete(&self, key: &ResourceKey) -> CacheResult<()> {
        let writable: Vec<&Layer> = self.layers.iter().filter(|l| l.policy.writable).collect();
        let results = join_all(writable.iter().map(|layer| layer.cache.remove(key))).await;

        let failures: Vec<LayerFailure> = writable
            .iter()
            .zip(results)
            .filter_map(|(layer, result)| {
                result.err().map(|e| LayerFailure {
                    layer: layer.cache.name().to_string(),
                    message: e.to_string(),
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Delete { failures })
        }
    }
}
