//! # Cache Providers
//!
//! This module contains the cache layer implementations.

// Re-export providers for easier access
pub use self::file::LocalFileCache;
pub use self::memory::MemoryCache;
pub use self::object_store::ObjectStoreCache;
pub use self::provider::CacheLayer;

// Provider interface
pub mod provider;

// Individual provider implementations
pub mod file;
pub mod memory;
pub mod object_store;
