//! # Cache Utilities
//!
//! Common utility functions for cache operations.

use crate::cache::types::{CacheError, CacheResult};
use crate::resource::ResourceKey;

/// Storage path of `key`, rejecting keys that would escape the cache root.
pub fn checked_storage_path(key: &ResourceKey) -> CacheResult<String> {
    let path = key.storage_path();
    let invalid = |reason: &str| CacheError::InvalidKey {
        key: key.clone(),
        reason: reason.to_string(),
    };

    if path.contains('\\') {
        return Err(invalid("backslashes are not allowed"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("relative path segment")),
            _ => {}
        }
    }
    Ok(path)
}
