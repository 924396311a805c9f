//! # Test Utilities
//!
//! A mock archive server plus helpers shared by the client and datastore tests.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::archive::{ArchiveConfig, RetryPolicy};

pub const TEST_DATASET: &str = "testds";
pub const TEST_DOI: &str = "10.5072/zenodo.123";
pub const TEST_TOKEN: &str = "test-token";

/// Initialize tracing for tests with appropriate settings
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Manifest served by a fresh [`MockArchive`]
pub fn default_manifest() -> Value {
    json!({
        "name": "testds",
        "title": "Test dataset",
        "resources": [
            {"name": "a.zip", "path": "a.zip", "parts": {"year": 2019, "region": "west"}},
            {"name": "b.zip", "path": "b.zip", "parts": {"year": 2020, "region": "east"}}
        ]
    })
}

/// Injected error response
#[derive(Clone, Copy)]
struct Failure {
    status: StatusCode,
    retry_after: Option<u64>,
}

/// A body sent as `chunks` pieces of `chunk_size` bytes, each after `delay`
#[derive(Clone, Copy)]
struct SlowBody {
    chunks: usize,
    chunk_size: usize,
    delay: Duration,
}

struct MockState {
    base: String,
    manifest: Mutex<Value>,
    include_manifest: AtomicBool,
    files: Mutex<HashMap<String, Bytes>>,
    slow_files: Mutex<HashMap<String, SlowBody>>,
    failures: Mutex<HashMap<String, VecDeque<Failure>>>,
    hits: Mutex<HashMap<String, usize>>,
    tokens: Mutex<Vec<String>>,
}

/// In-process archive serving one deposition for [`TEST_DOI`].
pub struct MockArchive {
    state: Arc<MockState>,
}

impl MockArchive {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock archive");
        let addr = listener.local_addr().expect("mock archive address");

        let state = Arc::new(MockState {
            base: format!("http://{addr}"),
            manifest: Mutex::new(default_manifest()),
            include_manifest: AtomicBool::new(true),
            files: Mutex::new(HashMap::new()),
            slow_files: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
            tokens: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { state }
    }

    /// Client configuration pointed at this server with fast retries
    pub fn config(&self) -> ArchiveConfig {
        ArchiveConfig::sandbox()
            .with_api_root(self.url("/api"))
            .with_access_token(TEST_TOKEN)
            .with_datasets([(TEST_DATASET, TEST_DOI)])
            .with_timeout(Duration::from_secs(5))
            .with_retry(Self::retry_policy(3))
    }

    pub fn retry_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.state.base)
    }

    pub fn deposition_path(&self) -> String {
        "/api/deposit/depositions/123".to_string()
    }

    pub fn set_manifest(&self, manifest: Value) {
        *self.state.manifest.lock().unwrap() = manifest;
    }

    /// Drop `datapackage.json` from the deposition listing
    pub fn hide_manifest(&self) {
        self.state.include_manifest.store(false, Ordering::SeqCst);
    }

    /// Serve `data` at `/files/<name>`
    pub fn add_file(&self, name: &str, data: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), Bytes::copy_from_slice(data));
    }

    /// Serve `chunks * chunk_size` bytes of `x` at `/files/<name>`, pausing
    /// `delay` before every chunk
    pub fn add_slow_file(&self, name: &str, chunks: usize, chunk_size: usize, delay: Duration) {
        self.state.slow_files.lock().unwrap().insert(
            name.to_string(),
            SlowBody {
                chunks,
                chunk_size,
                delay,
            },
        );
    }

    /// Answer the next requests for `path` with `statuses`, in order
    pub fn fail_next(&self, path: &str, statuses: &[StatusCode]) {
        let failures = statuses.iter().map(|&status| Failure {
            status,
            retry_after: None,
        });
        self.queue_failures(path, failures);
    }

    /// Answer the next request for `path` with `status` and a `Retry-After` header
    pub fn fail_next_with_retry_after(&self, path: &str, status: StatusCode, seconds: u64) {
        self.queue_failures(
            path,
            [Failure {
                status,
                retry_after: Some(seconds),
            }],
        );
    }

    fn queue_failures(&self, path: &str, failures: impl IntoIterator<Item = Failure>) {
        self.state
            .failures
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend(failures);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }

    /// Access tokens seen on incoming requests
    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    if let Some(token) = params.get("access_token") {
        state.tokens.lock().unwrap().push(token.clone());
    }

    let injected = state
        .failures
        .lock()
        .unwrap()
        .get_mut(&path)
        .and_then(VecDeque::pop_front);
    if let Some(failure) = injected {
        let mut response = (failure.status, "injected failure").into_response();
        if let Some(seconds) = failure.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, seconds.into());
        }
        return response;
    }

    if path == "/api/deposit/depositions/123" {
        let mut files: Vec<Value> = state
            .files
            .lock()
            .unwrap()
            .keys()
            .map(|name| file_entry(&state.base, name))
            .collect();
        if state.include_manifest.load(Ordering::SeqCst) {
            files.push(file_entry(&state.base, "datapackage.json"));
        }
        return axum::Json(json!({"id": 123, "files": files})).into_response();
    }

    match path.strip_prefix("/files/") {
        Some("datapackage.json") => {
            let manifest = state.manifest.lock().unwrap().clone();
            axum::Json(manifest).into_response()
        }
        Some(name) => {
            let slow = state.slow_files.lock().unwrap().get(name).copied();
            if let Some(slow) = slow {
                return slow_response(slow);
            }
            match state.files.lock().unwrap().get(name) {
                Some(data) => data.clone().into_response(),
                None => (StatusCode::NOT_FOUND, "no such file").into_response(),
            }
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn slow_response(slow: SlowBody) -> Response {
    let chunks = futures::stream::iter(0..slow.chunks).then(move |_| async move {
        tokio::time::sleep(slow.delay).await;
        Ok::<_, Infallible>(Bytes::from(vec![b'x'; slow.chunk_size]))
    });
    Body::from_stream(chunks).into_response()
}

fn file_entry(base: &str, name: &str) -> Value {
    json!({
        "filename": name,
        "links": {"download": format!("{base}/files/{name}")}
    })
}
