//! # Archive Client
//!
//! Access to the remote archive's REST API: resolving datasets to releases,
//! downloading and validating their descriptors, and fetching resource bytes.

mod client;
mod config;

pub use client::{ArchiveClient, create_client, deposition_id};
pub use config::{ArchiveConfig, ArchiveEnvironment, RetryPolicy};
