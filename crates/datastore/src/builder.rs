//! # Builder for DatastoreConfig
//!
//! Fluent construction of [`DatastoreConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use datastore_engine::DatastoreConfig;
//!
//! let config = DatastoreConfig::builder()
//!     .with_sandbox(true)
//!     .with_access_token("my-token")
//!     .with_local_cache_path("/tmp/datastore/data")
//!     .with_memory_cache_size(256 * 1024 * 1024)
//!     .with_timeout(Duration::from_secs(30))
//!     .build();
//!
//! assert_eq!(config.archive.api_root, "https://sandbox.zenodo.org/api");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::{ArchiveConfig, ArchiveEnvironment, CacheConfig, DatastoreConfig, RetryPolicy};

/// Builder for creating DatastoreConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DatastoreConfigBuilder {
    config: DatastoreConfig,
}

impl DatastoreConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DatastoreConfig::default(),
        }
    }

    /// Replace the whole cache configuration
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Replace the whole archive configuration
    pub fn with_archive_config(mut self, archive: ArchiveConfig) -> Self {
        self.config.archive = archive;
        self
    }

    /// Switch between the production and sandbox archives.
    ///
    /// The api root and dataset table follow the environment; token, timeouts,
    /// retry and offline settings are kept.
    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        let environment = if sandbox {
            ArchiveEnvironment::Sandbox
        } else {
            ArchiveEnvironment::Production
        };
        let previous = &self.config.archive;
        self.config.archive = ArchiveConfig {
            access_token: previous.access_token.clone(),
            timeout: previous.timeout,
            request_timeout: previous.request_timeout,
            offline: previous.offline,
            retry: previous.retry.clone(),
            user_agent: previous.user_agent.clone(),
            ..ArchiveConfig::for_environment(environment)
        };
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.config.archive.access_token = token.into();
        self
    }

    /// Set the connect timeout and the longest allowed wait between reads
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.archive.timeout = timeout;
        self
    }

    /// Cap the total duration of a request, body included
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.archive.request_timeout = Some(timeout);
        self
    }

    /// Serve only what the cache holds, without an access token
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.config.archive.offline = offline;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.archive.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.archive.user_agent = user_agent.into();
        self
    }

    /// Root directory of the local disk layer
    pub fn with_local_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache.local_cache_path = Some(path.into());
        self
    }

    /// Open the local disk layer without write access
    pub fn with_local_read_only(mut self, read_only: bool) -> Self {
        self.config.cache.local_read_only = read_only;
        self
    }

    /// Object storage layer location, `gs://bucket[/prefix]`
    pub fn with_remote_cache_url(mut self, url: impl Into<String>) -> Self {
        self.config.cache.remote_cache_url = Some(url.into());
        self
    }

    /// Size of the in-process memory layer in bytes; 0 disables it
    pub fn with_memory_cache_size(mut self, size: u64) -> Self {
        self.config.cache.memory_cache_size = size;
        self
    }

    /// Build the DatastoreConfig instance
    pub fn build(self) -> DatastoreConfig {
        self.config
    }
}

impl Default for DatastoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
