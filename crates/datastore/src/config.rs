use crate::{ArchiveConfig, CacheConfig};

/// Everything needed to open a [`Datastore`](crate::Datastore)
#[derive(Debug, Clone, Default)]
pub struct DatastoreConfig {
    /// Which cache layers to stack in front of the archive
    pub cache: CacheConfig,

    /// Archive environment, credentials and request behaviour
    pub archive: ArchiveConfig,
}

impl DatastoreConfig {
    pub fn builder() -> crate::builder::DatastoreConfigBuilder {
        crate::builder::DatastoreConfigBuilder::new()
    }

    /// True when at least one cache layer is configured
    pub fn has_cache(&self) -> bool {
        self.cache.memory_cache_size > 0
            || self.cache.local_cache_path.is_some()
            || self.cache.remote_cache_url.is_some()
    }
}
