//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - The `Fetcher` trait the scheduler and freshness probe dispatch through
//! - Building one HTTP client per proxy identity
//! - HEAD requests for the validator-header fingerprint
//! - GET requests to fetch page content
//! - Response classification (success, block, dead link, transient failure)

use crate::config::CrawlerConfig;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Method};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// HTTP method used for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Head,
}

/// A single outbound request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: FetchMethod,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: FetchMethod::Get,
            headers: Vec::new(),
            proxy: None,
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            method: FetchMethod::Head,
            ..Self::get(url)
        }
    }
}

/// A response as seen by the crawler
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
    /// URL after redirects
    pub final_url: Url,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Transport-level failures; every variant is worth retrying
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Invalid proxy '{proxy}': {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::Client(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// The fetch primitive
///
/// Implementations must be shareable across every in-flight task of every job.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client bound to one proxy identity
///
/// Idle connections are not pooled and there is no cookie store, so every request
/// starts from a clean identity apart from the proxy itself. With `decompress` off the
/// response keeps its `Content-Encoding` and `Content-Length` headers, which the
/// validator fingerprint depends on.
///
/// # Example
///
/// ```
/// use school_sweep::crawler::build_http_client;
/// use std::time::Duration;
///
/// let client = build_http_client(None, Duration::from_secs(30), true).unwrap();
/// # let _ = client;
/// ```
pub fn build_http_client(
    proxy: Option<&str>,
    timeout: Duration,
    decompress: bool,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .pool_max_idle_per_host(0)
        .gzip(decompress)
        .brotli(decompress);

    builder = match proxy {
        Some(endpoint) => builder.proxy(reqwest::Proxy::all(endpoint)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// `reqwest`-backed fetcher with one client per proxy endpoint and method kind
///
/// HEAD probes go through clients without transparent decompression so their
/// validator headers arrive as the server sent them.
pub struct HttpFetcher {
    clients: Mutex<HashMap<(Option<String>, bool), Client>>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }

    fn client_for(&self, proxy: Option<&str>, decompress: bool) -> Result<Client, FetchError> {
        let key = (proxy.map(str::to_string), decompress);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(proxy, self.timeout, decompress).map_err(|e| match proxy {
            Some(endpoint) => FetchError::Proxy {
                proxy: endpoint.to_string(),
                reason: e.to_string(),
            },
            None => FetchError::Client(e.to_string()),
        })?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of clients built so far, one per proxy identity and method kind
    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let decompress = request.method == FetchMethod::Get;
        let client = self.client_for(request.proxy.as_deref(), decompress)?;

        let method = match request.method {
            FetchMethod::Get => Method::GET,
            FetchMethod::Head => Method::HEAD,
        };

        let mut builder = client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = match request.method {
            FetchMethod::Head => String::new(),
            FetchMethod::Get => response.text().await?,
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
            final_url,
        })
    }
}

/// Classified outcome of one attempt
#[derive(Debug)]
pub enum FetchResult {
    /// A 2xx response with no block signal
    Success(FetchResponse),

    /// The site refused this identity
    Blocked { status: u16, reason: String },

    /// Non-2xx status that is not a block
    HttpError { status: u16, transient: bool },

    /// Transport failure (timeout, refused connection, TLS)
    NetworkError { error: String },
}

impl FetchResult {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchResult::Success(_) => false,
            FetchResult::Blocked { .. } | FetchResult::NetworkError { .. } => true,
            FetchResult::HttpError { transient, .. } => *transient,
        }
    }

    /// One-line reason used in logs and failure reports
    pub fn describe(&self) -> String {
        match self {
            FetchResult::Success(response) => format!("status {}", response.status),
            FetchResult::Blocked { reason, .. } => reason.clone(),
            FetchResult::HttpError { status, .. } => format!("HTTP status {}", status),
            FetchResult::NetworkError { error } => error.clone(),
        }
    }
}

/// Rules for recognizing a blocked response
#[derive(Debug, Clone)]
pub struct BlockPolicy {
    blocked_status_codes: Vec<u16>,
    block_markers: Vec<String>,
}

impl BlockPolicy {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            blocked_status_codes: config.blocked_status_codes.clone(),
            block_markers: config
                .block_markers
                .iter()
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }
}

/// Maps a fetch outcome onto the retry taxonomy
///
/// | Condition | Result |
/// |-----------|--------|
/// | Status in `blocked-status-codes` | Blocked |
/// | Body contains a block marker | Blocked |
/// | 2xx | Success |
/// | 5xx, 408 | HttpError, transient |
/// | Other status | HttpError, permanent |
/// | Transport error | NetworkError |
pub fn classify_response(
    outcome: Result<FetchResponse, FetchError>,
    policy: &BlockPolicy,
) -> FetchResult {
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            return FetchResult::NetworkError {
                error: e.to_string(),
            }
        }
    };

    if policy.blocked_status_codes.contains(&response.status) {
        return FetchResult::Blocked {
            status: response.status,
            reason: format!("blocked with status {}", response.status),
        };
    }

    if !response.body.is_empty() && !policy.block_markers.is_empty() {
        let body = response.body.to_lowercase();
        if let Some(marker) = policy.block_markers.iter().find(|m| body.contains(m.as_str())) {
            return FetchResult::Blocked {
                status: response.status,
                reason: format!("block marker '{}' in body", marker),
            };
        }
    }

    match response.status {
        200..=299 => FetchResult::Success(response),
        408 | 500..=599 => FetchResult::HttpError {
            status: response.status,
            transient: true,
        },
        status => FetchResult::HttpError {
            status,
            transient: false,
        },
    }
}
