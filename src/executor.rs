//! Resilient request executor.
//!
//! Wraps the four store operations the rest of the crate needs
//! (`write_document`, `search`, `update_fields`, `bulk_write`) with bounded
//! retry and exponential backoff. This is the only layer that retries;
//! callers above it treat any returned error as terminal for the current
//! invocation.
//!
//! # Retry Policy
//!
//! - Up to `max_attempts` attempts (default 3).
//! - HTTP 429 / 503 → wait `base * 2^attempt` (attempt counted from 0), retry.
//! - Connection failure → reset the shared client, same wait, retry.
//! - Any other error → surface immediately.
//! - Exhausted → surface the last error.
//!
//! Waits use `tokio::time::sleep`, so a backing-off call never blocks
//! other tool invocations.
//!
//! # Bulk Writes
//!
//! `bulk_write` frames items as NDJSON action/document line pairs and
//! sends them in chunks of `bulk_chunk_size`. Each chunk goes through the
//! same retry loop with the longer bulk timeout. Per-item failures inside
//! a 2xx response are tallied, never raised. A chunk that fails outright,
//! or whose response cannot be decoded, counts every item in it as failed;
//! if nothing succeeded at all the last error is returned instead.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::error::StoreError;
use crate::transport::{StoreRequest, StoreResponse};

/// Attempt bound and backoff base for one store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Timeouts and batching for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub bulk_timeout: Duration,
    pub bulk_chunk_size: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.backoff_base_ms),
            },
            timeout: Duration::from_secs(config.timeout_secs),
            bulk_timeout: Duration::from_secs(config.bulk_timeout_secs),
            bulk_chunk_size: config.bulk_chunk_size,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            bulk_timeout: Duration::from_secs(120),
            bulk_chunk_size: 500,
        }
    }
}

/// Store-reported result of a single-document write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteOutcome {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub result: Option<String>,
}

/// Store-reported result of a partial update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateOutcome {
    pub result: Option<String>,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl Hit {
    /// String field of `_source`, or `""` when missing or not a string.
    pub fn str_field(&self, field: &str) -> &str {
        self.source.get(field).and_then(Value::as_str).unwrap_or("")
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

/// One document in a bulk write, keyed by its store id.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub id: String,
    pub source: Value,
}

/// Tally of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Stateless store client; the only shared state is the connection.
#[derive(Clone)]
pub struct StoreExecutor {
    connections: Arc<ConnectionManager>,
    settings: ExecutorSettings,
}

impl StoreExecutor {
    pub fn new(connections: Arc<ConnectionManager>, settings: ExecutorSettings) -> Self {
        Self {
            connections,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Default per-attempt timeout for store calls.
    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    /// Indexes `document` into `collection` with a store-generated id.
    pub async fn write_document(
        &self,
        collection: &str,
        document: &Value,
    ) -> Result<WriteOutcome, StoreError> {
        let request = StoreRequest::post_json(
            format!("{}/_doc", collection),
            document.clone(),
            self.settings.timeout,
        );
        self.execute("index", request).await?.json()
    }

    /// Runs a query DSL body against `collection`.
    pub async fn search(
        &self,
        collection: &str,
        query: &Value,
        timeout: Duration,
    ) -> Result<Vec<Hit>, StoreError> {
        let request =
            StoreRequest::post_json(format!("{}/_search", collection), query.clone(), timeout);
        let parsed: SearchResponse = self.execute("search", request).await?.json()?;
        Ok(parsed.hits.hits)
    }

    /// Merges `fields` into the existing document `id`.
    pub async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: &Value,
    ) -> Result<UpdateOutcome, StoreError> {
        let request = StoreRequest::post_json(
            format!("{}/_update/{}", collection, urlencoding::encode(id)),
            json!({ "doc": fields }),
            self.settings.timeout,
        );
        self.execute("update", request).await?.json()
    }

    /// Upserts `items` into `collection` by id, in chunks.
    pub async fn bulk_write(
        &self,
        collection: &str,
        items: &[BulkItem],
    ) -> Result<BulkSummary, StoreError> {
        let mut summary = BulkSummary::default();
        if items.is_empty() {
            return Ok(summary);
        }

        let chunk_size = self.settings.bulk_chunk_size.max(1);
        let mut last_err = None;

        for chunk in items.chunks(chunk_size) {
            let request = StoreRequest::post_ndjson(
                "_bulk",
                frame_bulk(collection, chunk),
                self.settings.bulk_timeout,
            );
            let outcome = match self.execute("bulk", request).await {
                Ok(resp) => count_bulk_failures(&resp),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(failed) => {
                    let failed = failed.min(chunk.len());
                    summary.failed += failed;
                    summary.succeeded += chunk.len() - failed;
                }
                Err(e) => {
                    tracing::error!(
                        collection,
                        items = chunk.len(),
                        error = %e,
                        "bulk chunk failed"
                    );
                    summary.failed += chunk.len();
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if summary.succeeded == 0 => Err(e),
            _ => Ok(summary),
        }
    }

    /// The retry loop shared by every operation.
    async fn execute(
        &self,
        op: &'static str,
        request: StoreRequest,
    ) -> Result<StoreResponse, StoreError> {
        let policy = self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let (used, result) = match self.connections.acquire().await {
                Ok(transport) => {
                    let result = match transport.send(&request).await {
                        Ok(resp) => resp.error_for_status(),
                        Err(e) => Err(e),
                    };
                    (Some(transport), result)
                }
                Err(e) => (None, Err(e)),
            };

            let err = match result {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            if err.poisons_connection() {
                match &used {
                    Some(transport) => {
                        self.connections.discard(transport).await;
                    }
                    None => self.connections.reset().await,
                }
            }

            let has_attempts_left = attempt + 1 < max_attempts;
            if !err.is_transient() || !has_attempts_left {
                return Err(err);
            }

            let wait = policy.delay_for(attempt);
            tracing::warn!(
                op,
                path = %request.path,
                attempt = attempt + 1,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "document store call failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Builds the NDJSON body: one action line and one source line per item.
fn frame_bulk(collection: &str, items: &[BulkItem]) -> String {
    let mut body = String::new();
    for item in items {
        let action = json!({ "index": { "_index": collection, "_id": item.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&item.source.to_string());
        body.push('\n');
    }
    body
}

/// Counts `items[]` entries whose action result carries an `error`.
fn count_bulk_failures(resp: &StoreResponse) -> Result<usize, StoreError> {
    let parsed: Value = resp.json()?;
    let items = match parsed.get("items").and_then(Value::as_array) {
        Some(items) => items,
        None => return Ok(0),
    };
    Ok(items
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|actions| actions.values().next())
                .and_then(|result| result.get("error"))
                .is_some_and(|e| !e.is_null())
        })
        .count())
}
