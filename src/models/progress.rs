//! Deletion progress snapshots and final results.

use crate::models::upload::UploadRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Upper bound on per-upload failures kept in progress and result values.
pub const MAX_REPORTED_FAILURES: usize = 10;

/// A single upload that could not be aborted.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DeletionFailure {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl DeletionFailure {
    pub fn new(record: &UploadRecord, error: impl ToString) -> Self {
        Self {
            bucket: record.bucket.clone(),
            key: record.key.clone(),
            upload_id: record.upload_id.clone(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Point-in-time view of a running deletion.
#[derive(Serialize, Clone, Debug)]
pub struct ProgressState {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current_bucket: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub errors: Vec<DeletionFailure>,
}

impl ProgressState {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

/// Outcome of a finished deletion.
#[derive(Serialize, Clone, Debug)]
pub struct DeletionResult {
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub duration: Duration,
    pub errors: Vec<DeletionFailure>,
}
