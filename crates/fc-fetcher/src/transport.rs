//! HTTP transport for the fetch layer.
//!
//! The orchestration core only ever issues `GET` requests and only needs
//! three things back: the status code, the server build-version header,
//! and the raw body. [`Transport`] abstracts that narrow surface so the
//! dispatcher can run against a real backend ([`HttpTransport`], built on
//! `reqwest`) or against canned responses ([`StaticTransport`]) in tests
//! and demos.

use std::collections::VecDeque;
use std::sync::Arc;

use fc_core::{ConfigError, FetcherConfig};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use rustc_hash::FxHashMap;
use url::Url;

/// The parts of an HTTP response the fetch layer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,

    /// Value of the server build-version header, if present.
    pub version: Option<String>,

    /// Raw response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Builds a JSON response for tests and canned transports.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            version: None,
            body: body.to_string().into_bytes(),
        }
    }

    /// Attaches a server version header value.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Errors produced below the HTTP response level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be joined onto the base URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The offending endpoint string.
        endpoint: String,
        /// Explanation of the failure.
        reason: String,
    },

    /// The request failed without producing an HTTP response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A scripted transport-level failure.
    #[error("network error: {0}")]
    Failed(String),

    /// A canned transport had no response scripted for the endpoint.
    #[error("no response scripted for endpoint '{0}'")]
    NotScripted(String),
}

/// A source of HTTP GET responses.
///
/// Implementations must never panic; every failure mode is a
/// [`TransportError`].
pub trait Transport: Send + Sync + 'static {
    /// Issues one GET request for the endpoint.
    fn get(&self, endpoint: &str) -> BoxFuture<'_, Result<RawResponse, TransportError>>;
}

/// The production transport: `reqwest` against a console backend.
///
/// Endpoints are root-relative paths (`/ac/...`) resolved against the
/// configured base URL, the way a browser resolves them against its
/// origin. Every request carries `Accept: application/json`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    version_header: String,
}

impl HttpTransport {
    /// Creates a transport from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration does not validate.
    pub fn new(config: &FetcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let base_url = Url::parse(&config.base_url).map_err(|err| ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            version_header: config.version_header.clone(),
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, endpoint: &str) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        let url = match self.base_url.join(endpoint) {
            Ok(url) => url,
            Err(err) => {
                let error = TransportError::InvalidEndpoint {
                    endpoint: endpoint.to_owned(),
                    reason: err.to_string(),
                };
                return async move { Err(error) }.boxed();
            }
        };

        async move {
            let response = self
                .client
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status().as_u16();
            let version = response
                .headers()
                .get(&self.version_header)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned);
            let body = response.bytes().await?.to_vec();

            Ok(RawResponse {
                status,
                version,
                body,
            })
        }
        .boxed()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("version_header", &self.version_header)
            .finish_non_exhaustive()
    }
}

enum Scripted {
    Response(RawResponse),
    NetworkError(String),
}

/// An in-memory transport serving scripted responses.
///
/// Each endpoint holds a queue of replies; the last reply is served
/// repeatedly once the queue is down to one entry, so polling tests keep
/// receiving data. Every request is recorded for call-count assertions.
///
/// # Examples
///
/// ```
/// use fc_fetcher::StaticTransport;
/// use serde_json::json;
///
/// let transport = StaticTransport::new();
/// transport.script_json("/ac/mesh", 200, &json!([{"id": "m1"}]));
/// assert_eq!(transport.request_count("/ac/mesh"), 0);
/// ```
#[derive(Default)]
pub struct StaticTransport {
    scripts: Mutex<FxHashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<String>>,
    latency: Mutex<std::time::Duration>,
}

impl StaticTransport {
    /// Creates a transport with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the transport for sharing with a fetcher.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Scripts a JSON response for an endpoint.
    pub fn script_json(&self, endpoint: &str, status: u16, body: &serde_json::Value) {
        self.script(endpoint, RawResponse::json(status, body));
    }

    /// Scripts a full response (status, version header, body).
    pub fn script(&self, endpoint: &str, response: RawResponse) {
        self.scripts
            .lock()
            .entry(endpoint.to_owned())
            .or_default()
            .push_back(Scripted::Response(response));
    }

    /// Scripts a transport-level failure for an endpoint.
    pub fn script_network_error(&self, endpoint: &str, message: impl Into<String>) {
        self.scripts
            .lock()
            .entry(endpoint.to_owned())
            .or_default()
            .push_back(Scripted::NetworkError(message.into()));
    }

    /// Makes every response take this long to arrive.
    ///
    /// Useful with paused tokio time to keep requests in flight while a
    /// test exercises the pending-endpoint bookkeeping.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock() = latency;
    }

    /// Every endpoint requested so far, in request order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// How many times the endpoint was requested.
    #[must_use]
    pub fn request_count(&self, endpoint: &str) -> usize {
        self.requests.lock().iter().filter(|e| *e == endpoint).count()
    }
}

impl Transport for StaticTransport {
    fn get(&self, endpoint: &str) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        self.requests.lock().push(endpoint.to_owned());

        let reply = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(endpoint) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().map(|scripted| match scripted {
                    Scripted::Response(response) => Scripted::Response(response.clone()),
                    Scripted::NetworkError(message) => Scripted::NetworkError(message.clone()),
                }),
                None => None,
            }
        };

        let result = match reply {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::NetworkError(message)) => Err(TransportError::Failed(message)),
            None => Err(TransportError::NotScripted(endpoint.to_owned())),
        };
        let latency = *self.latency.lock();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        }
        .boxed()
    }
}

impl std::fmt::Debug for StaticTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTransport")
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}
