//! # Cache System
//!
//! This module provides the layered cache used to keep archived resources
//! close to the caller. Each backend implements [`CacheLayer`]; a
//! [`LayeredCache`] orders them from fastest to most durable, reads through
//! them front to back and back-fills the faster layers on a hit.

// Module declarations
mod layered;
pub mod providers;
mod types;
mod utils;

// Re-export primary types from our various modules
pub use layered::LayeredCache;
pub use types::{CacheConfig, CacheError, CacheResult, LayerFailure, LayerPolicy};
pub use utils::checked_storage_path;

pub use providers::{CacheLayer, LocalFileCache, MemoryCache, ObjectStoreCache};
