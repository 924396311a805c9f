//! # Datastore
//!
//! The top-level entry point. A [`Datastore`] serves resources from its
//! layered cache and falls back to the archive on a miss, writing whatever it
//! downloads back into the cache.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use md5::{Digest, Md5};
use moka::future::Cache as MokaCache;
use tracing::{debug, info, warn};

use crate::archive::ArchiveClient;
use crate::cache::{LayeredCache, LocalFileCache, MemoryCache, ObjectStoreCache};
use crate::config::DatastoreConfig;
use crate::descriptor::{DESCRIPTOR_NAME, ResourceDescriptor};
use crate::error::{DatastoreError, Result};
use crate::resource::{PartitionFilters, ResourceKey};

/// Outcome of checking a dataset's cached copy against its descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub dataset: String,
    pub release_id: String,
    /// Number of resources examined
    pub checked: usize,
    /// Declared resources no cache layer holds
    pub missing: Vec<ResourceKey>,
    /// Cached resources whose md5 does not match the declared hash
    pub corrupted: Vec<ResourceKey>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.corrupted.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} resources checked, {} missing, {} corrupted",
            self.dataset,
            self.release_id,
            self.checked,
            self.missing.len(),
            self.corrupted.len()
        )?;
        for key in &self.missing {
            write!(f, "\n  missing: {}", key.name)?;
        }
        for key in &self.corrupted {
            write!(f, "\n  corrupted: {}", key.name)?;
        }
        Ok(())
    }
}

pub struct Datastore {
    cache: LayeredCache,
    client: ArchiveClient,
    /// Descriptors by release id, kept for the lifetime of the datastore
    descriptors: MokaCache<String, Arc<ResourceDescriptor>>,
}

impl Datastore {
    /// Open a datastore with the cache layers described by `config`.
    ///
    /// Layers are stacked fastest first: memory, local disk, then object storage.
    pub fn new(config: DatastoreConfig) -> Result<Self> {
        let client = ArchiveClient::new(config.archive)?;
        let mut cache = LayeredCache::new();

        if config.cache.memory_cache_size > 0 {
            cache.add_layer(MemoryCache::new(config.cache.memory_cache_size));
        }

        if let Some(path) = config.cache.local_cache_path {
            if config.cache.local_read_only {
                cache.add_layer(LocalFileCache::read_only(path));
            } else {
                cache.add_layer(LocalFileCache::new(path));
            }
        }

        if let Some(url) = config.cache.remote_cache_url {
            let layer = ObjectStoreCache::from_gcs_url(&url).map_err(|e| {
                DatastoreError::Configuration(format!("Cannot open remote cache {url}: {e}"))
            })?;
            cache.add_layer(layer);
        }

        info!(
            environment = %client.environment(),
            layers = ?cache.layer_names(),
            "Opened datastore"
        );
        Ok(Self::with_parts(cache, client))
    }

    /// Assemble a datastore from an already configured cache and client.
    pub fn with_parts(cache: LayeredCache, client: ArchiveClient) -> Self {
        Self {
            cache,
            client,
            descriptors: MokaCache::builder().build(),
        }
    }

    pub fn cache(&self) -> &LayeredCache {
        &self.cache
    }

    pub fn client(&self) -> &ArchiveClient {
        &self.client
    }

    /// Datasets this datastore can serve, alphabetically
    pub fn get_known_datasets(&self) -> Vec<String> {
        self.client.known_datasets()
    }

    /// Descriptor of the configured release of `dataset`.
    ///
    /// A cached copy short-circuits the network. Otherwise the descriptor is
    /// downloaded and its canonical form is written to the cache.
    pub async fn get_datapackage_descriptor(
        &self,
        dataset: &str,
    ) -> Result<Arc<ResourceDescriptor>> {
        let doi = self.client.resolve_release(dataset)?;
        self.descriptors
            .try_get_with(doi.to_string(), self.load_descriptor(dataset, doi))
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    async fn load_descriptor(&self, dataset: &str, doi: &str) -> Result<Arc<ResourceDescriptor>> {
        let key = ResourceKey::new(dataset, doi, DESCRIPTOR_NAME);

        if let Some(data) = self.cache.lookup(&key).await {
            debug!(key = %key, "Using cached datapackage descriptor");
            // A corrupt cached descriptor is an error, never a reason to refetch
            let descriptor = ResourceDescriptor::from_slice(&data, dataset, doi)?;
            return Ok(Arc::new(descriptor));
        }

        let descriptor = self.client.fetch_descriptor(dataset).await?;
        self.cache.set(&key, descriptor.canonical_bytes()?).await?;
        Ok(descriptor)
    }

    /// Bytes of a single resource, from the cache or else from the archive.
    pub async fn get_resource(&self, key: &ResourceKey) -> Result<Bytes> {
        if let Some(data) = self.cache.lookup(key).await {
            return Ok(data);
        }

        let data = self.client.fetch_resource_bytes(key).await?;
        self.cache.set(key, data.clone()).await?;
        Ok(data)
    }

    /// Lazily retrieve every resource of `dataset` matching `filters`, in manifest order.
    ///
    /// Nothing is downloaded until the stream is polled, and only one resource is
    /// held at a time.
    pub fn get_resources(
        &self,
        dataset: &str,
        filters: &PartitionFilters,
    ) -> impl Stream<Item = Result<(ResourceKey, Bytes)>> + '_ {
        let dataset = dataset.to_string();
        let filters = filters.clone();

        async_stream::try_stream! {
            let descriptor = self.get_datapackage_descriptor(&dataset).await?;
            for key in descriptor.matching_resources(None, &filters) {
                let data = self.get_resource(&key).await?;
                yield (key, data);
            }
        }
    }

    /// Bytes of the only resource of `dataset` matching `filters`.
    pub async fn get_unique_resource(
        &self,
        dataset: &str,
        filters: &PartitionFilters,
    ) -> Result<Bytes> {
        let descriptor = self.get_datapackage_descriptor(dataset).await?;
        let mut keys = descriptor.matching_resources(None, filters);

        let Some(key) = keys.next() else {
            return Err(DatastoreError::NotFound(format!(
                "No resources found for {dataset}: {filters:?}"
            )));
        };
        if keys.next().is_some() {
            let count = 2 + keys.count();
            return Err(DatastoreError::AmbiguousResult(format!(
                "Found {count} matching resources for {dataset}: {filters:?}"
            )));
        }

        self.get_resource(&key).await
    }

    /// Open the only resource matching `filters` as a zip archive.
    pub async fn get_zipfile_resource(
        &self,
        dataset: &str,
        filters: &PartitionFilters,
    ) -> Result<zip::ZipArchive<Cursor<Bytes>>> {
        let data = self.get_unique_resource(dataset, filters).await?;
        Ok(zip::ZipArchive::new(Cursor::new(data))?)
    }

    /// Check the cached copy of `dataset` without touching the network.
    ///
    /// Every declared resource must be cached, and resources declaring a hash
    /// must match it.
    pub async fn validate(&self, dataset: &str) -> Result<ValidationReport> {
        let doi = self.client.resolve_release(dataset)?;
        let descriptor_key = ResourceKey::new(dataset, doi, DESCRIPTOR_NAME);
        let data = self.cache.lookup(&descriptor_key).await.ok_or_else(|| {
            DatastoreError::NotFound(format!("No cached descriptor for {dataset}/{doi}"))
        })?;
        let descriptor = ResourceDescriptor::from_slice(&data, dataset, doi)?;

        let mut report = ValidationReport {
            dataset: dataset.to_string(),
            release_id: doi.to_string(),
            checked: 0,
            missing: Vec::new(),
            corrupted: Vec::new(),
        };

        for entry in descriptor.resources() {
            let key = ResourceKey::new(dataset, doi, &entry.name);
            report.checked += 1;

            let Some(data) = self.cache.lookup(&key).await else {
                warn!(key = %key, "Resource missing from cache");
                report.missing.push(key);
                continue;
            };

            if let Some(expected) = entry.md5() {
                let actual = hex::encode(Md5::digest(&data));
                if !actual.eq_ignore_ascii_case(expected) {
                    warn!(key = %key, expected, actual = %actual, "Cached resource is corrupted");
                    report.corrupted.push(key);
                }
            }
        }

        debug!(
            dataset,
            checked = report.checked,
            valid = report.is_valid(),
            "Validated cached dataset"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::test_utils::{MockArchive, TEST_DATASET, TEST_DOI, init_tracing};
    use futures::TryStreamExt;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn filters(pairs: &[(&str, &str)]) -> PartitionFilters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn datastore(archive: &MockArchive, local: &LocalFileCache) -> Datastore {
        let mut cache = LayeredCache::new();
        cache.add_layer(local.clone());
        Datastore::with_parts(cache, ArchiveClient::new(archive.config()).unwrap())
    }

    fn md5_hex(data: &[u8]) -> String {
        hex::encode(Md5::digest(data))
    }

    #[tokio::test]
    async fn test_get_resources_fetches_then_serves_from_cache() {
        init_tracing();
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        archive.add_file("b.zip", b"beta");
        let dir = tempdir().unwrap();
        let local = LocalFileCache::new(dir.path());
        let store = datastore(&archive, &local);

        let first: Vec<_> = store
            .get_resources(TEST_DATASET, &PartitionFilters::new())
            .try_collect()
            .await
            .unwrap();
        let names: Vec<_> = first.iter().map(|(k, _)| k.name.as_str()).collect();
        assert_eq!(names, ["a.zip", "b.zip"]);
        assert_eq!(first[0].1, Bytes::from_static(b"alpha"));
        assert_eq!(first[0].0.release_id, TEST_DOI);

        let second: Vec<_> = store
            .get_resources(TEST_DATASET, &PartitionFilters::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(archive.hits("/files/a.zip"), 1);
        assert_eq!(archive.hits("/files/b.zip"), 1);

        let key = ResourceKey::new(TEST_DATASET, TEST_DOI, "a.zip");
        assert_eq!(local.get(&key).await.unwrap(), Some(Bytes::from_static(b"alpha")));
    }

    #[tokio::test]
    async fn test_resources_stream_is_lazy() {
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        let dir = tempdir().unwrap();
        let store = datastore(&archive, &LocalFileCache::new(dir.path()));

        let no_filters = PartitionFilters::new();
        let stream = store.get_resources(TEST_DATASET, &no_filters);
        assert_eq!(archive.total_hits(), 0);

        // b.zip is never served, but the caller stops after the first item
        futures::pin_mut!(stream);
        let (key, _) = stream.try_next().await.unwrap().unwrap();
        assert_eq!(key.name, "a.zip");
        assert_eq!(archive.hits("/files/b.zip"), 0);
    }

    #[tokio::test]
    async fn test_partition_filters() {
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        archive.add_file("b.zip", b"beta");
        let dir = tempdir().unwrap();
        let store = datastore(&archive, &LocalFileCache::new(dir.path()));

        let west: Vec<_> = store
            .get_resources(TEST_DATASET, &filters(&[("region", "west")]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(west.len(), 1);
        assert_eq!(west[0].0.name, "a.zip");

        let by_year: Vec<_> = store
            .get_resources(TEST_DATASET, &filters(&[("year", "2020")]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(by_year.len(), 1);
        assert_eq!(by_year[0].0.name, "b.zip");
        assert_eq!(archive.hits("/files/a.zip"), 1);
    }

    #[tokio::test]
    async fn test_descriptor_is_cached_canonically() {
        let archive = MockArchive::start().await;
        let dir = tempdir().unwrap();
        let local = LocalFileCache::new(dir.path());

        let descriptor = datastore(&archive, &local)
            .get_datapackage_descriptor(TEST_DATASET)
            .await
            .unwrap();
        let cached = local
            .get(&descriptor.descriptor_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, descriptor.canonical_bytes().unwrap());
        assert!(
            dir.path()
                .join("testds/10.5072-zenodo.123/datapackage.json")
                .exists()
        );

        // A fresh datastore over the same directory never asks the archive
        let reopened = datastore(&archive, &local)
            .get_datapackage_descriptor(TEST_DATASET)
            .await
            .unwrap();
        assert_eq!(reopened.resources(), descriptor.resources());
        assert_eq!(archive.hits(&archive.deposition_path()), 1);
    }

    #[tokio::test]
    async fn test_invalid_cached_descriptor_is_fatal() {
        let archive = MockArchive::start().await;
        let dir = tempdir().unwrap();
        let local = LocalFileCache::new(dir.path());
        let key = ResourceKey::new(TEST_DATASET, TEST_DOI, DESCRIPTOR_NAME);
        local
            .put(&key, Bytes::from_static(br#"{"resources": []}"#))
            .await
            .unwrap();

        let err = datastore(&archive, &local)
            .get_datapackage_descriptor(TEST_DATASET)
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Validation(_)), "{err}");
        assert_eq!(archive.total_hits(), 0);
    }

    #[tokio::test]
    async fn test_failed_descriptor_load_is_not_memoized() {
        let archive = MockArchive::start().await;
        let path = archive.deposition_path();
        archive.fail_next(&path, &[StatusCode::NOT_FOUND]);
        let dir = tempdir().unwrap();
        let store = datastore(&archive, &LocalFileCache::new(dir.path()));

        let err = store
            .get_datapackage_descriptor(TEST_DATASET)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(store.get_datapackage_descriptor(TEST_DATASET).await.is_ok());
        assert_eq!(archive.hits(&path), 2);
    }

    #[tokio::test]
    async fn test_get_unique_resource() {
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        let dir = tempdir().unwrap();
        let store = datastore(&archive, &LocalFileCache::new(dir.path()));

        let data = store
            .get_unique_resource(TEST_DATASET, &filters(&[("year", "2019")]))
            .await
            .unwrap();
        assert_eq!(data, Bytes::from_static(b"alpha"));

        let none = store
            .get_unique_resource(TEST_DATASET, &filters(&[("year", "1999")]))
            .await
            .unwrap_err();
        assert!(matches!(none, DatastoreError::NotFound(_)), "{none}");

        let many = store
            .get_unique_resource(TEST_DATASET, &PartitionFilters::new())
            .await
            .unwrap_err();
        assert!(matches!(many, DatastoreError::AmbiguousResult(_)), "{many}");
        assert_eq!(archive.hits("/files/b.zip"), 0);
    }

    #[tokio::test]
    async fn test_get_zipfile_resource() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("data.csv", options).unwrap();
        writer.write_all(b"year,value\n2019,1\n").unwrap();
        let zipped = writer.finish().unwrap().into_inner();

        let archive = MockArchive::start().await;
        archive.add_file("a.zip", &zipped);
        archive.add_file("b.zip", b"not a zip");
        let dir = tempdir().unwrap();
        let store = datastore(&archive, &LocalFileCache::new(dir.path()));

        let mut zipfile = store
            .get_zipfile_resource(TEST_DATASET, &filters(&[("region", "west")]))
            .await
            .unwrap();
        let mut contents = String::new();
        zipfile
            .by_name("data.csv")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "year,value\n2019,1\n");

        let err = store
            .get_zipfile_resource(TEST_DATASET, &filters(&[("region", "east")]))
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Archive(_)), "{err}");
    }

    #[tokio::test]
    async fn test_validate_reports_missing_and_corrupted() {
        let archive = MockArchive::start().await;
        archive.set_manifest(json!({
            "name": "testds",
            "resources": [
                {"name": "a.zip", "path": "a.zip", "hash": format!("md5:{}", md5_hex(b"alpha"))},
                {"name": "b.zip", "path": "b.zip", "hash": md5_hex(b"beta")},
                {"name": "c.zip", "path": "c.zip"}
            ]
        }));
        archive.add_file("a.zip", b"alpha");
        archive.add_file("b.zip", b"beta");
        archive.add_file("c.zip", b"gamma");
        let dir = tempdir().unwrap();
        let local = LocalFileCache::new(dir.path());
        let store = datastore(&archive, &local);

        assert!(store.validate(TEST_DATASET).await.unwrap_err().is_not_found());

        let _: Vec<_> = store
            .get_resources(TEST_DATASET, &PartitionFilters::new())
            .try_collect()
            .await
            .unwrap();
        let report = store.validate(TEST_DATASET).await.unwrap();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.checked, 3);

        let hits_before = archive.total_hits();
        local
            .put(
                &ResourceKey::new(TEST_DATASET, TEST_DOI, "a.zip"),
                Bytes::from_static(b"tampered"),
            )
            .await
            .unwrap();
        local
            .remove(&ResourceKey::new(TEST_DATASET, TEST_DOI, "c.zip"))
            .await
            .unwrap();

        let report = store.validate(TEST_DATASET).await.unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.corrupted.len(), 1);
        assert_eq!(report.corrupted[0].name, "a.zip");
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].name, "c.zip");
        assert_eq!(archive.total_hits(), hits_before);
    }

    #[tokio::test]
    async fn test_offline_validation_without_token() {
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        archive.add_file("b.zip", b"beta");
        let dir = tempdir().unwrap();
        let local = LocalFileCache::new(dir.path());
        let _: Vec<_> = datastore(&archive, &local)
            .get_resources(TEST_DATASET, &PartitionFilters::new())
            .try_collect()
            .await
            .unwrap();
        let hits_before = archive.total_hits();

        let offline = archive.config().with_access_token("").with_offline(true);
        let mut cache = LayeredCache::new();
        cache.add_layer(local.clone());
        let store = Datastore::with_parts(cache, ArchiveClient::new(offline).unwrap());

        let report = store.validate(TEST_DATASET).await.unwrap();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.checked, 2);

        // Anything not cached cannot be fetched
        local
            .remove(&ResourceKey::new(TEST_DATASET, TEST_DOI, "b.zip"))
            .await
            .unwrap();
        let key = ResourceKey::new(TEST_DATASET, TEST_DOI, "b.zip");
        assert!(matches!(
            store.get_resource(&key).await,
            Err(DatastoreError::Configuration(_))
        ));
        assert_eq!(archive.total_hits(), hits_before);
    }

    #[tokio::test]
    async fn test_new_stacks_configured_layers() {
        let archive = MockArchive::start().await;
        let dir = tempdir().unwrap();

        let config = DatastoreConfig::builder()
            .with_archive_config(archive.config())
            .with_memory_cache_size(1024 * 1024)
            .with_local_cache_path(dir.path())
            .build();
        let store = Datastore::new(config).unwrap();
        assert_eq!(store.cache().layer_names(), ["memory", "local"]);
        assert_eq!(store.get_known_datasets(), [TEST_DATASET]);

        let bad_remote = DatastoreConfig::builder()
            .with_archive_config(archive.config())
            .with_remote_cache_url("s3://bucket")
            .build();
        assert!(matches!(
            Datastore::new(bad_remote),
            Err(DatastoreError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_read_only_local_layer_is_not_written() {
        let archive = MockArchive::start().await;
        archive.add_file("a.zip", b"alpha");
        let dir = tempdir().unwrap();

        let config = DatastoreConfig::builder()
            .with_archive_config(archive.config())
            .with_memory_cache_size(1024 * 1024)
            .with_local_cache_path(dir.path())
            .with_local_read_only(true)
            .build();
        let store = Datastore::new(config).unwrap();

        let key = ResourceKey::new(TEST_DATASET, TEST_DOI, "a.zip");
        assert_eq!(
            store.get_resource(&key).await.unwrap(),
            Bytes::from_static(b"alpha")
        );
        assert!(store.cache().contains_in_layer(0, &key).await.unwrap());
        assert!(!store.cache().contains_in_layer(1, &key).await.unwrap());
    }
}
