//! Result persistence.
//!
//! Validates and normalizes a `save_results` payload, then hands a single
//! write to the [`StoreExecutor`]. Validation failures never reach the
//! store.
//!
//! 1. `result_type` must name a [`ResultType`].
//! 2. `data` must parse as a JSON object.
//! 3. The type's timestamp field is filled with the current UTC time if absent.
//! 4. Gaps without a status start as `open`.
//! 5. One `write_document` into the type's collection.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::StoreError;
use crate::executor::StoreExecutor;
use crate::models::{GapStatus, ResultDocument, ResultType, UnknownResultType};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    InvalidResultType(#[from] UnknownResultType),

    #[error("Invalid JSON in data: {0}")]
    InvalidJson(String),

    #[error("{error}")]
    Store {
        collection: &'static str,
        #[source]
        error: StoreError,
    },
}

impl SaveError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Store { .. })
    }

    /// Tool-result shape of this failure.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Store { collection, error } => match (error.http_status(), error.body()) {
                (Some(status), Some(body)) => json!({
                    "status": "error",
                    "index": collection,
                    "http_status": status,
                    "message": body,
                }),
                _ => json!({
                    "status": "error",
                    "index": collection,
                    "message": error.to_string(),
                }),
            },
            other => json!({ "status": "error", "message": other.to_string() }),
        }
    }
}

/// A successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub collection: &'static str,
    pub id: Option<String>,
    pub result: Option<String>,
}

impl SaveOutcome {
    pub fn to_json(&self) -> Value {
        json!({
            "status": "ok",
            "index": self.collection,
            "id": self.id,
            "result": self.result,
        })
    }
}

/// Validates `raw` as a `result_type` document and writes it.
pub async fn save(
    exec: &StoreExecutor,
    result_type: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<SaveOutcome, SaveError> {
    let result_type: ResultType = result_type.parse()?;
    let document =
        ResultDocument::parse(result_type, raw).map_err(|e| SaveError::InvalidJson(e.to_string()))?;
    save_document(exec, document, now).await
}

/// Writes an already-typed document, filling its timestamp if needed.
pub async fn save_document(
    exec: &StoreExecutor,
    mut document: ResultDocument,
    now: DateTime<Utc>,
) -> Result<SaveOutcome, SaveError> {
    document.ensure_timestamp(now);
    if let ResultDocument::Gap(gap) = &mut document {
        gap.status.get_or_insert(GapStatus::Open);
    }

    let collection = document.collection();
    let body = document
        .to_value()
        .map_err(|e| SaveError::InvalidJson(e.to_string()))?;

    let outcome = exec
        .write_document(collection, &body)
        .await
        .map_err(|error| {
            tracing::error!(collection, error = %error, "document store indexing failed");
            SaveError::Store { collection, error }
        })?;

    Ok(SaveOutcome {
        collection,
        id: outcome.id,
        result: outcome.result,
    })
}
