//! Request/response contract with the document store.
//!
//! The store layer never touches `reqwest` directly: it builds a
//! [`StoreRequest`] and hands it to a [`Transport`]. Production uses
//! [`HttpTransport`], a pooled keep-alive `reqwest::Client` carrying the
//! `ApiKey` authorization header; tests substitute scripted transports.
//!
//! Transports are produced by a [`TransportFactory`] so the
//! [`ConnectionManager`](crate::connection::ConnectionManager) can discard
//! a poisoned pool and build a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

/// HTTP verb of a store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// Body framing of a store request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// `application/json`
    Json(Value),
    /// `application/x-ndjson`, used by `_bulk`.
    NdJson(String),
}

/// One HTTP call against the store, relative to the store base URL.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub method: Method,
    /// Path below the base URL, e.g. `ti-gaps/_search`.
    pub path: String,
    pub body: RequestBody,
    /// Per-attempt timeout; the call site owns it.
    pub timeout: Duration,
}

impl StoreRequest {
    pub fn post_json(path: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: RequestBody::Json(body),
            timeout,
        }
    }

    pub fn post_ndjson(path: impl Into<String>, body: String, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: RequestBody::NdJson(body),
            timeout,
        }
    }
}

/// Raw store response: status plus body text.
#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub status: u16,
    pub body: String,
}

impl StoreResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts a non-2xx response into [`StoreError::Status`].
    pub fn error_for_status(self) -> Result<Self, StoreError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StoreError::status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_str(&self.body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

/// A live connection to the store.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request. Non-2xx statuses are returned as responses, not errors.
    async fn send(&self, request: &StoreRequest) -> Result<StoreResponse, StoreError>;

    /// Whether the transport was closed and must be rebuilt.
    fn is_closed(&self) -> bool;

    /// Closes the transport. Idempotent.
    async fn close(&self);
}

/// Builds fresh transports for the connection manager.
pub trait TransportFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Transport>, StoreError>;
}

// ============ reqwest implementation ============

/// Pooled keep-alive HTTP client bound to one store base URL.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("ApiKey {}", api_key))
            .map_err(|e| StoreError::Client(format!("invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &StoreRequest) -> Result<StoreResponse, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Connection("client is closed".to_string()));
        }

        let url = self.url(&request.path);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };

        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(value.to_string()),
            RequestBody::NdJson(text) => builder
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(text.clone()),
        };

        let resp = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, request.timeout))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, request.timeout))?;

        Ok(StoreResponse { status, body })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        // reqwest has no explicit shutdown; dropping the last handle tears
        // down the pool. The flag stops this handle from being reused.
        self.closed.store(true, Ordering::Release);
    }
}

/// Maps a reqwest failure onto the store taxonomy.
fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(timeout)
    } else if err.is_builder() {
        StoreError::Client(err.to_string())
    } else {
        // connect, request (reset mid-flight), and body read failures
        StoreError::Connection(err.to_string())
    }
}

/// Factory producing [`HttpTransport`]s for a configured store.
pub struct HttpTransportFactory {
    base_url: String,
    api_key: String,
}

impl HttpTransportFactory {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self) -> Result<Arc<dyn Transport>, StoreError> {
        Ok(Arc::new(HttpTransport::new(&self.base_url, &self.api_key)?))
    }
}
