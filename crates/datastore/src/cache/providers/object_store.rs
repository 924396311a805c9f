//! # Object Store Cache
//!
//! Cache layer backed by an object storage bucket. Every key maps to the
//! object `<prefix>/<dataset>/<release-id>/<name>`.

use std::sync::Arc;

use ::object_store::gcp::GoogleCloudStorageBuilder;
use ::object_store::path::Path as ObjectPath;
use ::object_store::{ObjectStore, PutPayload};
use bytes::Bytes;
use tracing::{debug, info};
use url::Url;

use crate::cache::types::{CacheError, CacheResult};
use crate::cache::utils::checked_storage_path;
use crate::resource::ResourceKey;

use super::CacheLayer;

#[derive(Clone)]
pub struct ObjectStoreCache {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    label: String,
}

impl ObjectStoreCache {
    /// Wrap an existing object store, placing every object under `prefix`
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl AsRef<str>) -> Self {
        Self {
            store,
            prefix: prefix.as_ref().trim_matches('/').to_string(),
            label: "object-store".to_string(),
        }
    }

    /// Connect to a Google Cloud Storage location of the form `gs://bucket[/prefix]`.
    ///
    /// Credentials are taken from the environment.
    pub fn from_gcs_url(location: &str) -> CacheResult<Self> {
        let (bucket, prefix) = parse_gcs_url(location)?;
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&bucket)
            .build()?;

        info!(bucket = %bucket, prefix = %prefix, "Using object storage cache layer");
        let mut cache = Self::new(Arc::new(store), prefix);
        cache.label = format!("gs://{bucket}");
        Ok(cache)
    }

    /// Object path for a cached resource
    pub fn object_path(&self, key: &ResourceKey) -> CacheResult<ObjectPath> {
        let relative = checked_storage_path(key)?;
        let full = if self.prefix.is_empty() {
            relative
        } else {
            format!("{}/{}", self.prefix, relative)
        };
        ObjectPath::parse(&full).map_err(|e| CacheError::InvalidKey {
            key: key.clone(),
            reason: e.to_string(),
        })
    }
}

/// Split `gs://bucket[/prefix]` into bucket and (possibly empty) prefix.
pub fn parse_gcs_url(location: &str) -> CacheResult<(String, String)> {
    let url = Url::parse(location)
        .map_err(|e| CacheError::InvalidLocation(format!("{location}: {e}")))?;

    if url.scheme() != "gs" {
        return Err(CacheError::InvalidLocation(format!(
            "{location}: expected a gs:// URL"
        )));
    }

    let bucket = match url.host_str() {
        Some(bucket) if !bucket.is_empty() => bucket.to_string(),
        _ => {
            return Err(CacheError::InvalidLocation(format!(
                "{location}: missing bucket name"
            )));
        }
    };

    let prefix = url.path().trim_matches('/').to_string();
    Ok((bucket, prefix))
}

#[async_trait::async_trait]
impl CacheLayer for ObjectStoreCache {
    fn name(&self) -> &str {
        &self.label
    }

    async fn contains(&self, key: &ResourceKey) -> CacheResult<bool> {
        let path = self.object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(::object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &ResourceKey) -> CacheResult<Option<Bytes>> {
        let path = self.object_path(key)?;
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(::object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &ResourceKey, data: Bytes) -> CacheResult<()> {
        let path = self.object_path(key)?;
        let size = data.len();
        self.store.put(&path, PutPayload::from(data)).await?;
        debug!(key = %key, object = %path, size, "Uploaded entry to object storage");
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> CacheResult<()> {
        let path = self.object_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(::object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
