use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

const DEFAULT_USER_AGENT: &str = concat!("datastore/", env!("CARGO_PKG_VERSION"));

/// Which archive deployment a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArchiveEnvironment {
    #[default]
    Production,
    Sandbox,
}

impl ArchiveEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveEnvironment::Production => "production",
            ArchiveEnvironment::Sandbox => "sandbox",
        }
    }

    pub fn api_root(&self) -> &'static str {
        match self {
            ArchiveEnvironment::Production => "https://zenodo.org/api",
            ArchiveEnvironment::Sandbox => "https://sandbox.zenodo.org/api",
        }
    }

    /// Dataset name to release DOI table of this environment
    pub fn datasets(&self) -> BTreeMap<String, String> {
        let table: &[(&str, &str)] = match self {
            ArchiveEnvironment::Production => &[
                ("censusdp1tract", "10.5281/zenodo.4127049"),
                ("eia860", "10.5281/zenodo.4127027"),
                ("eia860m", "10.5281/zenodo.4281337"),
                ("eia861", "10.5281/zenodo.4127029"),
                ("eia923", "10.5281/zenodo.4127040"),
                ("epacems", "10.5281/zenodo.4127055"),
                ("ferc1", "10.5281/zenodo.4127044"),
                ("ferc714", "10.5281/zenodo.4127101"),
            ],
            ArchiveEnvironment::Sandbox => &[
                ("censusdp1tract", "10.5072/zenodo.674992"),
                ("eia860", "10.5072/zenodo.672210"),
                ("eia860m", "10.5072/zenodo.692655"),
                ("eia861", "10.5072/zenodo.687052"),
                ("eia923", "10.5072/zenodo.687071"),
                ("epacems", "10.5072/zenodo.672963"),
                ("ferc1", "10.5072/zenodo.687072"),
                ("ferc714", "10.5072/zenodo.672224"),
            ],
        };
        table
            .iter()
            .map(|(dataset, doi)| (dataset.to_string(), doi.to_string()))
            .collect()
    }
}

impl fmt::Display for ArchiveEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry behaviour for archive requests.
///
/// The n-th retry waits `backoff_base * 2^(n-1)`, capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    /// Statuses treated as transient
    pub retry_statuses: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
            retry_statuses: vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before the given 1-based retry
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Everything an [`ArchiveClient`](super::ArchiveClient) needs to reach one environment
#[derive(Clone)]
pub struct ArchiveConfig {
    pub environment: ArchiveEnvironment,
    /// Base of the archive's REST API, e.g. `https://zenodo.org/api`
    pub api_root: String,
    /// Sent as the `access_token` query parameter on every request
    pub access_token: String,
    /// Dataset name to release DOI
    pub datasets: BTreeMap<String, String>,
    /// Connect timeout and the longest wait between two reads of a response
    pub timeout: Duration,
    /// Optional cap on a whole request, body included
    pub request_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub user_agent: String,
    /// Never contact the archive; only cached data can be served
    pub offline: bool,
}

impl ArchiveConfig {
    pub fn for_environment(environment: ArchiveEnvironment) -> Self {
        Self {
            environment,
            api_root: environment.api_root().to_string(),
            access_token: String::new(),
            datasets: environment.datasets(),
            timeout: Duration::from_secs(15),
            request_timeout: None,
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            offline: false,
        }
    }

    pub fn production() -> Self {
        Self::for_environment(ArchiveEnvironment::Production)
    }

    pub fn sandbox() -> Self {
        Self::for_environment(ArchiveEnvironment::Sandbox)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    /// Replace the dataset table
    pub fn with_datasets<I, K, V>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.datasets = datasets
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// An offline client needs no access token and refuses every request
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::production()
    }
}

// Keep the token out of debug output
impl fmt::Debug for ArchiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveConfig")
            .field("environment", &self.environment)
            .field("api_root", &self.api_root)
            .field("access_token", &"<redacted>")
            .field("datasets", &self.datasets)
            .field("timeout", &self.timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("user_agent", &self.user_agent)
            .field("offline", &self.offline)
            .finish()
    }
}
