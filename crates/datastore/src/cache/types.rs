//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::path::PathBuf;

use crate::resource::ResourceKey;

/// Configuration for the cache layers a datastore is built with
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Root directory of the local disk layer
    pub local_cache_path: Option<PathBuf>,
    /// Open the local disk layer without write access
    pub local_read_only: bool,
    /// Object storage layer location, `gs://bucket[/prefix]`
    pub remote_cache_url: Option<String>,
    /// Maximum size of the in-process memory layer in bytes; 0 disables it
    pub memory_cache_size: u64,
}

/// How a layered cache treats one of its layers on writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPolicy {
    /// Receives `set` calls and back-fills
    pub writable: bool,
    /// A failed write to this layer fails the whole `set`
    pub critical: bool,
}

impl LayerPolicy {
    pub fn read_only() -> Self {
        Self {
            writable: false,
            critical: false,
        }
    }

    pub fn critical() -> Self {
        Self {
            writable: true,
            critical: true,
        }
    }
}

impl Default for LayerPolicy {
    fn default() -> Self {
        Self {
            writable: true,
            critical: false,
        }
    }
}

/// A single layer's share of a failed multi-layer operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFailure {
    pub layer: String,
    pub message: String,
}

fn describe(failures: &[LayerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.layer, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid cache key {key}: {reason}")]
    InvalidKey { key: ResourceKey, reason: String },

    #[error("Invalid cache location: {0}")]
    InvalidLocation(String),

    #[error("Entry {key} of {size} bytes exceeds the {max_size} byte {layer} cache")]
    EntryTooLarge {
        layer: String,
        key: ResourceKey,
        size: u64,
        max_size: u64,
    },

    #[error("Cache layer {0} is read-only")]
    ReadOnly(String),

    #[error("Resource {0} not found in any cache layer")]
    NotFound(ResourceKey),

    #[error("Failed to write {} cache layer(s): {}", .failures.len(), describe(.failures))]
    Write { failures: Vec<LayerFailure> },

    #[error("Failed to delete from {} cache layer(s): {}", .failures.len(), describe(.failures))]
    Delete { failures: Vec<LayerFailure> },
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;
