use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use regex::Regex;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::config::{ArchiveConfig, ArchiveEnvironment};
use crate::descriptor::{DESCRIPTOR_NAME, ResourceDescriptor};
use crate::error::{DatastoreError, Result};
use crate::resource::ResourceKey;

static DEPOSITION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"zenodo\.(\d+)").expect("deposition id pattern is valid"));

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &ArchiveConfig) -> Result<Client> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent);

    // Bound each wait rather than the whole transfer, so large bodies can stream
    if !config.timeout.is_zero() {
        client_builder = client_builder
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout);
    }

    if let Some(timeout) = config.request_timeout.filter(|t| !t.is_zero()) {
        client_builder = client_builder.timeout(timeout);
    }

    client_builder.build().map_err(DatastoreError::from)
}

/// Numeric deposition id embedded in an archive DOI such as `10.5281/zenodo.4127049`.
pub fn deposition_id(doi: &str) -> Result<u64> {
    DEPOSITION_ID
        .captures(doi)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| DatastoreError::Configuration(format!("Invalid doi {doi}")))
}

#[derive(Deserialize)]
struct Deposition {
    files: Vec<DepositionFile>,
}

#[derive(Deserialize)]
struct DepositionFile {
    filename: String,
    links: FileLinks,
}

#[derive(Deserialize)]
struct FileLinks {
    download: String,
}

/// A validated descriptor together with the URL it was downloaded from
#[derive(Clone)]
struct ReleaseManifest {
    descriptor: Arc<ResourceDescriptor>,
    manifest_url: Url,
}

/// Client for one archive environment.
///
/// Descriptors are memoized per release for the lifetime of the client;
/// concurrent first requests for the same release share a single download.
pub struct ArchiveClient {
    http: Client,
    config: Arc<ArchiveConfig>,
    manifests: MokaCache<String, ReleaseManifest>,
}

impl ArchiveClient {
    /// Validate `config` and build the HTTP client.
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        Url::parse(&config.api_root).map_err(|e| {
            DatastoreError::Configuration(format!("Invalid api root {}: {e}", config.api_root))
        })?;
        if config.access_token.is_empty() && !config.offline {
            return Err(DatastoreError::Configuration(format!(
                "No access token configured for the {} archive",
                config.environment
            )));
        }
        for doi in config.datasets.values() {
            deposition_id(doi)?;
        }

        let http = create_client(&config)?;
        debug!(
            environment = %config.environment,
            api_root = %config.api_root,
            datasets = config.datasets.len(),
            "Created archive client"
        );

        Ok(Self {
            http,
            config: Arc::new(config),
            manifests: MokaCache::builder().build(),
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn environment(&self) -> ArchiveEnvironment {
        self.config.environment
    }

    /// Configured dataset names in alphabetical order.
    pub fn known_datasets(&self) -> Vec<String> {
        self.config.datasets.keys().cloned().collect()
    }

    /// Release identifier (DOI) configured for `dataset`.
    pub fn resolve_release(&self, dataset: &str) -> Result<&str> {
        self.config
            .datasets
            .get(dataset)
            .map(String::as_str)
            .ok_or_else(|| DatastoreError::NotFound(format!("No doi found for dataset {dataset}")))
    }

    pub fn resource_key(&self, dataset: &str, name: &str) -> Result<ResourceKey> {
        let doi = self.resolve_release(dataset)?;
        Ok(ResourceKey::new(dataset, doi, name))
    }

    /// Metadata endpoint listing the files of a release.
    pub fn deposition_url(&self, doi: &str) -> Result<Url> {
        let id = deposition_id(doi)?;
        let url = format!(
            "{}/deposit/depositions/{id}",
            self.config.api_root.trim_end_matches('/')
        );
        Url::parse(&url).map_err(|e| DatastoreError::Configuration(format!("{url}: {e}")))
    }

    /// Validated descriptor of the configured release of `dataset`.
    pub async fn fetch_descriptor(&self, dataset: &str) -> Result<Arc<ResourceDescriptor>> {
        Ok(self.manifest(dataset).await?.descriptor)
    }

    async fn manifest(&self, dataset: &str) -> Result<ReleaseManifest> {
        let doi = self.resolve_release(dataset)?;
        self.manifests
            .try_get_with(doi.to_string(), self.load_manifest(dataset, doi))
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    async fn load_manifest(&self, dataset: &str, doi: &str) -> Result<ReleaseManifest> {
        info!(dataset, doi, "Fetching datapackage descriptor from archive");

        let body = self.fetch(&self.deposition_url(doi)?).await?;
        let deposition: Deposition = serde_json::from_slice(&body)?;

        let file = deposition
            .files
            .into_iter()
            .find(|f| f.filename == DESCRIPTOR_NAME)
            .ok_or_else(|| {
                DatastoreError::MissingManifest(format!(
                    "Archive deposition for {dataset}/{doi} does not contain a valid {DESCRIPTOR_NAME}"
                ))
            })?;

        let manifest_url = Url::parse(&file.links.download).map_err(|e| {
            DatastoreError::Configuration(format!(
                "Invalid download link {}: {e}",
                file.links.download
            ))
        })?;

        let body = self.fetch(&manifest_url).await?;
        let descriptor = ResourceDescriptor::from_slice(&body, dataset, doi)?;
        debug!(
            dataset,
            doi,
            resources = descriptor.resources().len(),
            "Loaded datapackage descriptor"
        );

        Ok(ReleaseManifest {
            descriptor: Arc::new(descriptor),
            manifest_url,
        })
    }

    /// Download the contents of `key` from the archive.
    pub async fn fetch_resource_bytes(&self, key: &ResourceKey) -> Result<Bytes> {
        let doi = self.resolve_release(&key.dataset)?;
        if doi != key.release_id {
            return Err(DatastoreError::NotFound(format!(
                "Release {} is not configured for dataset {} (expected {doi})",
                key.release_id, key.dataset
            )));
        }

        let manifest = self.manifest(&key.dataset).await?;
        let location = manifest.descriptor.resource_location(&key.name)?;
        // Absolute locations replace the base; relative ones sit next to the manifest
        let url = manifest.manifest_url.join(location).map_err(|e| {
            DatastoreError::Configuration(format!("Invalid location {location} for {key}: {e}"))
        })?;

        debug!(key = %key, url = %url, "Downloading resource from archive");
        let data = self.fetch(&url).await?;
        debug!(key = %key, size = data.len(), "Downloaded resource");
        Ok(data)
    }

    /// GET `url` with the access token, retrying transient failures.
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        if self.config.offline {
            return Err(DatastoreError::Configuration(format!(
                "Archive client is offline, refusing to fetch {url}"
            )));
        }

        let retry = &self.config.retry;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let request = self
                .http
                .get(url.clone())
                .query(&[("access_token", self.config.access_token.as_str())]);

            let delay = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let e = match response.bytes().await {
                            Ok(body) => return Ok(body),
                            Err(e) => e.without_url(),
                        };
                        if !(e.is_timeout() || e.is_body()) || attempts > retry.max_retries {
                            return Err(e.into());
                        }

                        let delay = retry.delay(attempts);
                        warn!(url = %url, error = %e, attempt = attempts, ?delay, "Archive download interrupted, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if !retry.should_retry(status) || attempts > retry.max_retries {
                        let body = response.text().await.unwrap_or_default();
                        return Err(DatastoreError::Fetch {
                            url: url.to_string(),
                            status,
                            body,
                        });
                    }

                    let delay = retry_after(&response)
                        .map(|d| d.min(retry.max_backoff))
                        .unwrap_or_else(|| retry.delay(attempts));
                    warn!(url = %url, status = %status, attempt = attempts, ?delay, "Transient archive error, retrying");
                    delay
                }
                Err(e) => {
                    // The error's URL carries the access token
                    let e = e.without_url();
                    if !(e.is_connect() || e.is_timeout() || e.is_request())
                        || attempts > retry.max_retries
                    {
                        return Err(e.into());
                    }

                    let delay = retry.delay(attempts);
                    warn!(url = %url, error = %e, attempt = attempts, ?delay, "Archive request failed, retrying");
                    delay
                }
            };

            tokio::time::sleep(delay).await;
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
