//! Helpers for testing collectors and snapshot stores.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. Snapshot files written after the directory has been dropped
//!    end up in a directory nobody cleans up.
//!
//!  - When using [`BlobServer`], make sure that the server is held until all requests to it have
//!    been made. Dropping it stops the server and all further connections are refused.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use axum::http::{Method, StatusCode};
pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `scrapecache` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "scrapecache_service=trace,scrapecache_lookup=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A local HTTP server running in the background of a test.
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Serves `router` on an ephemeral port on localhost.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_router(router: Router) -> Self {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A request received by a [`BlobServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    /// The request method.
    pub method: Method,
    /// The requested `<container>/<blob>`.
    pub path: String,
    /// The raw query string.
    pub query: Option<String>,
    /// The request headers this server cares about.
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct BlobState {
    blobs: BTreeMap<String, Vec<u8>>,
    forced_status: Option<StatusCode>,
    delay: Option<Duration>,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<BlobState>>;

const RECORDED_HEADERS: &[&str] = &[
    "authorization",
    "content-type",
    "x-ms-blob-type",
    "x-ms-version",
];

/// An in-memory stand-in for a storage account's blob service.
///
/// Blobs are addressed as `<container>/<blob>` relative to [`endpoint`](Self::endpoint).
/// `GET` downloads a blob, `PUT` overwrites it. All requests are recorded, and every request can
/// be made to fail with a fixed status code or to answer late.
pub struct BlobServer {
    server: Server,
    state: SharedState,
}

impl BlobServer {
    /// Starts a blob server without any blobs.
    pub fn new() -> Self {
        let state = SharedState::default();
        let router = Router::new()
            .route("/*path", get(get_blob).put(put_blob))
            .with_state(Arc::clone(&state));

        Self {
            server: Server::with_router(router),
            state,
        }
    }

    fn state(&self) -> MutexGuard<'_, BlobState> {
        self.state.lock().unwrap()
    }

    /// The blob service endpoint, ending with a `/`.
    pub fn endpoint(&self) -> Url {
        self.server.url("/")
    }

    /// Stores a blob at `<container>/<blob>`.
    pub fn put_blob(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.state().blobs.insert(path.to_owned(), content.into());
    }

    /// The content of the blob at `<container>/<blob>`.
    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.state().blobs.get(path).cloned()
    }

    /// Answers every following request with `status`, or serves blobs normally again with
    /// `None`.
    pub fn force_status(&self, status: Option<StatusCode>) {
        self.state().forced_status = status;
    }

    /// Delays every following response by `delay`.
    pub fn delay_responses(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// The number of requests received so far.
    pub fn hits(&self) -> usize {
        self.state().requests.len()
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }
}

impl Default for BlobServer {
    fn default() -> Self {
        Self::new()
    }
}

fn record(
    state: &mut BlobState,
    method: Method,
    path: &str,
    query: Option<String>,
    headers: &HeaderMap,
) {
    let headers = RECORDED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_owned()))
        })
        .collect();

    state.requests.push(RecordedRequest {
        method,
        path: path.to_owned(),
        query,
        headers,
    });
}

async fn wait_for_delay(state: &SharedState) {
    let delay = state.lock().unwrap().delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

fn forced_response(status: StatusCode) -> Response {
    let code = match status {
        StatusCode::FORBIDDEN => "AuthorizationFailure",
        StatusCode::UNAUTHORIZED => "InvalidAuthenticationInfo",
        _ => "InternalError",
    };
    (status, [("x-ms-error-code", code)], "<Error/>").into_response()
}

async fn get_blob(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    wait_for_delay(&state).await;
    let mut state = state.lock().unwrap();
    record(&mut state, Method::GET, &path, query, &headers);

    if let Some(status) = state.forced_status {
        return forced_response(status);
    }
    match state.blobs.get(&path) {
        Some(content) => (StatusCode::OK, content.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            [("x-ms-error-code", "BlobNotFound")],
            "<Error/>",
        )
            .into_response(),
    }
}

async fn put_blob(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    wait_for_delay(&state).await;
    let mut state = state.lock().unwrap();
    record(&mut state, Method::PUT, &path, query, &headers);

    if let Some(status) = state.forced_status {
        return forced_response(status);
    }
    state.blobs.insert(path, body.to_vec());
    StatusCode::CREATED.into_response()
}
