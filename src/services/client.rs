//! Rate-limited, retrying wrapper around a [`StorageApi`].
//!
//! Every call waits on the shared token bucket, then runs; retryable failures
//! back off and try again until the retry budget is spent. Cancellation is
//! honored while waiting for a token and while sleeping between attempts.

use crate::errors::{SweepError, SweepResult};
use crate::services::api::{
    ApiError, ListPartsRequest, ListSessionsRequest, PartPage, SessionPage, StorageApi,
};
use crate::services::rate_limit::RateLimiter;
use crate::services::retry::{ErrorClassification, RetryConfig, classify};
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct RetryingClient {
    api: Arc<dyn StorageApi>,
    limiter: RateLimiter,
    retry: RetryConfig,
}

impl RetryingClient {
    pub fn new(api: Arc<dyn StorageApi>, rate_limit: f64, retry: RetryConfig) -> Self {
        Self {
            api,
            limiter: RateLimiter::new(rate_limit),
            retry,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn rate_limit(&self) -> f64 {
        self.limiter.rate()
    }

    async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> SweepResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            self.limiter.acquire(cancel).await?;

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == ErrorClassification::NonRetryable {
                debug!(operation, attempt, error = %err, "non-retryable error");
                return Err(SweepError::Remote {
                    operation: operation.to_string(),
                    source: err,
                });
            }

            if attempt >= self.retry.max_retries {
                warn!(operation, attempt, error = %err, "retries exhausted");
                return Err(SweepError::RetriesExhausted {
                    operation: operation.to_string(),
                    retries: self.retry.max_retries,
                    source: err,
                });
            }

            let backoff = self.retry.backoff_delay(attempt);
            warn!(
                operation,
                attempt,
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "retryable error, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SweepError::Cancelled),
                _ = sleep(backoff) => {}
            }
            attempt += 1;
        }
    }

    pub async fn list_buckets(&self, cancel: &CancellationToken) -> SweepResult<Vec<String>> {
        self.execute("ListBuckets", cancel, || self.api.list_buckets())
            .await
    }

    pub async fn get_bucket_location(
        &self,
        bucket: &str,
        cancel: &CancellationToken,
    ) -> SweepResult<Option<String>> {
        let operation = format!("GetBucketLocation({bucket})");
        self.execute(&operation, cancel, || self.api.get_bucket_location(bucket))
            .await
    }

    pub async fn list_upload_sessions(
        &self,
        request: &ListSessionsRequest,
        cancel: &CancellationToken,
    ) -> SweepResult<SessionPage> {
        let operation = format!("ListMultipartUploads({})", request.bucket);
        self.execute(&operation, cancel, || self.api.list_upload_sessions(request))
            .await
    }

    pub async fn list_upload_parts(
        &self,
        request: &ListPartsRequest,
        cancel: &CancellationToken,
    ) -> SweepResult<PartPage> {
        let operation = format!("ListParts({}/{})", request.bucket, request.key);
        self.execute(&operation, cancel, || self.api.list_upload_parts(request))
            .await
    }

    pub async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> SweepResult<()> {
        let operation = format!("AbortMultipartUpload({bucket}/{key})");
        self.execute(&operation, cancel, || {
            self.api.abort_upload(bucket, key, upload_id)
        })
        .await
    }
}
