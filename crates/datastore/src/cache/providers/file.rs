//! # File Cache
//!
//! This module implements the local-filesystem cache layer. Every key maps to
//! `<root>/<dataset>/<release-id>/<name>`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::types::{CacheError, CacheResult};
use crate::cache::utils::checked_storage_path;
use crate::resource::ResourceKey;

use super::CacheLayer;

#[derive(Debug, Clone)]
pub struct LocalFileCache {
    cache_dir: PathBuf,
    read_only: bool,
}

impl LocalFileCache {
    /// Create a new writable file cache rooted at the specified directory
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            read_only: false,
        }
    }

    /// Open an existing cache directory without write access
    pub fn read_only(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            read_only: true,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the path for a cached resource
    pub fn get_cache_path(&self, key: &ResourceKey) -> CacheResult<PathBuf> {
        let relative = checked_storage_path(key)?;
        Ok(relative
            .split('/')
            .fold(self.cache_dir.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait::async_trait]
impl CacheLayer for LocalFileCache {
    fn name(&self) -> &str {
        "local"
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn contains(&self, key: &ResourceKey) -> CacheResult<bool> {
        let data_path = self.get_cache_path(key)?;
        Ok(fs::try_exists(&data_path).await?)
    }

    async fn get(&self, key: &ResourceKey) -> CacheResult<Option<Bytes>> {
        let data_path = self.get_cache_path(key)?;

        match fs::read(&data_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = ?data_path, error = %e, "Failed to read cache data file");
                Err(e.into())
            }
        }
    }

    async fn put(&self, key: &ResourceKey, data: Bytes) -> CacheResult<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly(self.name().to_string()));
        }

        let data_path = self.get_cache_path(key)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named sibling then rename, so concurrent writers of the
        // same key never observe a partially written file
        let temp_path =
            data_path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&temp_path, &data).await {
            warn!(path = ?temp_path, error = %e, "Failed to write cache data file");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &data_path).await {
            warn!(
                from = ?temp_path,
                to = ?data_path,
                error = %e,
                "Failed to rename temporary data file"
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Cached entry to file");
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> CacheResult<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly(self.name().to_string()));
        }

        let data_path = self.get_cache_path(key)?;

        match fs::remove_file(&data_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?data_path, error = %e, "Failed to remove cache data file");
                Err(e.into())
            }
        }
    }
}
