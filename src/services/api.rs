//! Raw provider seam: the five storage calls the sweeper consumes.
//!
//! Everything above this trait is provider-agnostic. The production adapter
//! lives in [`crate::services::s3_api`]; tests substitute an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Service error codes that indicate a transient condition.
pub const RETRYABLE_CODES: [&str; 6] = [
    "RequestTimeout",
    "ServiceUnavailable",
    "InternalError",
    "SlowDown",
    "TooManyRequests",
    "RequestTimeTooSkewed",
];

/// Failure of a single provider call, before any retry decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {message}")]
    Transport { message: String, transient: bool },

    #[error("{code}: {message}")]
    NotFound { code: String, message: String },

    #[error("{code}: {message}")]
    Service { code: String, message: String },
}

impl ApiError {
    pub fn transport(message: impl Into<String>, transient: bool) -> Self {
        Self::Transport {
            message: message.into(),
            transient,
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transient transport failures and service errors mentioning a
    /// [`RETRYABLE_CODES`] entry are retryable; not-found never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Transport { transient, .. } => *transient,
            Self::Service { .. } => {
                let text = self.to_string();
                RETRYABLE_CODES.iter().any(|code| text.contains(code))
            }
        }
    }
}

/// Cursor for one page of in-progress uploads in a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSessionsRequest {
    pub bucket: String,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub max_uploads: Option<i32>,
}

impl ListSessionsRequest {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }
}

/// One upload as returned by the provider; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: Option<String>,
    pub upload_id: Option<String>,
    pub initiated: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Cursor for one page of parts of a single upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPartsRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartSummary {
    pub part_number: Option<i32>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PartPage {
    pub parts: Vec<PartSummary>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<String>,
}

/// Remote object-storage calls, one request per method.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Names of every bucket visible to the credentials.
    async fn list_buckets(&self) -> Result<Vec<String>, ApiError>;

    /// Raw location constraint; `None` or empty means the default region.
    async fn get_bucket_location(&self, bucket: &str) -> Result<Option<String>, ApiError>;

    async fn list_upload_sessions(
        &self,
        request: &ListSessionsRequest,
    ) -> Result<SessionPage, ApiError>;

    async fn list_upload_parts(&self, request: &ListPartsRequest) -> Result<PartPage, ApiError>;

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<(), ApiError>;
}
