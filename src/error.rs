//! Document-store error taxonomy.
//!
//! Every failure the store layer can produce is a [`StoreError`]. The
//! executor asks [`StoreError::is_transient`] once per attempt to decide
//! between retrying and surfacing; nothing above the executor retries.
//!
//! | Condition | Variant | Transient |
//! |-----------|---------|-----------|
//! | HTTP 429 / 503 | `Status` | yes |
//! | Other non-2xx | `Status` | no |
//! | Connection refused / reset | `Connection` | yes (client is reset) |
//! | Per-attempt timeout | `Timeout` | no |
//! | Client construction | `Client` | no |
//! | Undecodable 2xx body | `Decode` | no |

use std::time::Duration;

use thiserror::Error;

/// Maximum number of response-body characters carried in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// HTTP statuses the executor treats as transient.
///
/// This is a closed set; every retry decision goes through
/// [`RetryableStatus::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableStatus {
    TooManyRequests,
    ServiceUnavailable,
}

impl RetryableStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            429 => Some(Self::TooManyRequests),
            503 => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::TooManyRequests => 429,
            Self::ServiceUnavailable => 503,
        }
    }
}

/// A failed document-store call.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store answered with a non-2xx status.
    #[error("document store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The connection was refused, reset, or dropped mid-request.
    #[error("connection to document store failed: {0}")]
    Connection(String),

    /// The attempt exceeded its request timeout.
    #[error("document store request timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP client could not be built.
    #[error("failed to build document store client: {0}")]
    Client(String),

    /// A 2xx response whose body was not the expected JSON.
    #[error("unexpected document store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Builds a `Status` error, truncating the body to [`MAX_ERROR_BODY_CHARS`].
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            body: truncate_body(body),
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => RetryableStatus::from_code(*status).is_some(),
            Self::Connection(_) => true,
            _ => false,
        }
    }

    /// Whether the pooled client should be discarded before retrying.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The (already truncated) response body, when the store sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Truncates `body` to at most [`MAX_ERROR_BODY_CHARS`] characters,
/// respecting UTF-8 boundaries.
pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
