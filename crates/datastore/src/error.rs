use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;

use crate::cache::CacheError;

pub type Result<T, E = DatastoreError> = std::result::Result<T, E>;

// Cloneable so memoized loads can hand the same failure to every waiter.
#[derive(Debug, thiserror::Error, Clone)]
pub enum DatastoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not download {url}: status {status}: {body}")]
    Fetch {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous result: {0}")]
    AmbiguousResult(String),

    #[error("Cache error: {source}")]
    Cache {
        #[from]
        source: Arc<CacheError>,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: Arc<serde_json::Error>,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Missing manifest: {0}")]
    MissingManifest(String),
}

impl DatastoreError {
    /// Returns true for lookup failures (unknown dataset, resource or cache entry).
    pub fn is_not_found(&self) -> bool {
        match self {
            DatastoreError::NotFound(_) => true,
            DatastoreError::Cache { source } => {
                matches!(source.as_ref(), CacheError::NotFound(_))
            }
            _ => false,
        }
    }

    /// Returns the HTTP status attached to a fetch failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DatastoreError::Fetch { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DatastoreError {
    fn from(err: reqwest::Error) -> Self {
        DatastoreError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<CacheError> for DatastoreError {
    fn from(err: CacheError) -> Self {
        DatastoreError::Cache {
            source: Arc::new(err),
        }
    }
}

impl From<serde_json::Error> for DatastoreError {
    fn from(err: serde_json::Error) -> Self {
        DatastoreError::Json {
            source: Arc::new(err),
        }
    }
}

impl From<zip::result::ZipError> for DatastoreError {
    fn from(err: zip::result::ZipError) -> Self {
        DatastoreError::Archive(err.to_string())
    }
}

/// Every structural problem found in one datapackage descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub dataset: String,
    pub release_id: String,
    pub issues: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Found {} datapackage validation errors:", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  * {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
