//! Incomplete multipart upload sessions as the sweeper sees them.

use crate::errors::{SweepError, SweepResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Storage class assumed when the provider omits one.
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// One in-progress multipart upload.
///
/// `size` is zero until a size lookup has summed the upload's parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadRecord {
    /// Bucket the upload belongs to.
    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    /// Provider-issued upload identifier.
    pub upload_id: String,

    /// When the upload was initiated.
    pub initiated: DateTime<Utc>,

    /// Sum of uploaded part sizes in bytes.
    pub size: u64,

    /// Storage class of the eventual object.
    pub storage_class: String,

    /// Region of the owning bucket.
    pub region: String,
}

impl UploadRecord {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
        initiated: DateTime<Utc>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            initiated,
            size: 0,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            region: region.into(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = storage_class.into();
        self
    }

    /// Age of the upload relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.initiated
    }

    pub fn age(&self) -> TimeDelta {
        self.age_at(Utc::now())
    }

    /// Reject records that cannot address a remote upload.
    pub fn validate(&self) -> SweepResult<()> {
        if self.bucket.is_empty() {
            return Err(SweepError::invalid("upload", "bucket name is empty"));
        }
        if self.key.is_empty() {
            return Err(SweepError::invalid("upload", "object key is empty"));
        }
        if self.upload_id.is_empty() {
            return Err(SweepError::invalid("upload", "upload id is empty"));
        }
        if self.storage_class.is_empty() {
            return Err(SweepError::invalid("upload", "storage class is empty"));
        }
        if self.region.is_empty() {
            return Err(SweepError::invalid("upload", "region is empty"));
        }
        Ok(())
    }
}
