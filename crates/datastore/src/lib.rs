//! # Datastore Engine
//!
//! A library for retrieving versioned, immutable dataset resources from a
//! remote archive and serving them through a multi-tier cache.
//!
//! ## Features
//!
//! - Datapackage descriptors with structural validation and canonical serialization
//! - Archive client with per-request timeouts and exponential backoff retries
//! - Layered cache over memory, local disk and object storage with back-fill
//! - Lazy resource streams filtered by partition metadata

pub mod archive;
pub mod builder;
pub mod cache;
pub mod config;
pub mod datastore;
pub mod descriptor;
pub mod error;
pub mod resource;

#[cfg(test)]
pub(crate) mod test_utils;

pub use archive::{ArchiveClient, ArchiveConfig, ArchiveEnvironment, RetryPolicy};
pub use builder::DatastoreConfigBuilder;
pub use cache::{CacheConfig, CacheError, CacheLayer, LayerPolicy, LayeredCache};
pub use config::DatastoreConfig;
pub use datastore::{Datastore, ValidationReport};
pub use descriptor::{DESCRIPTOR_NAME, ResourceDescriptor, ResourceEntry};
pub use error::{DatastoreError, Result, ValidationError};
pub use resource::{PartitionFilters, ResourceKey};
