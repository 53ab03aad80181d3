//! Enumerates incomplete uploads across buckets and regions.
//!
//! Collection runs in two fan-out stages over the worker pool: resolve each
//! bucket's region, then list the uploads of every bucket that matches the
//! scope. A failing bucket never aborts the run; its error is folded into the
//! [`PartialFailure`] returned next to whatever was collected.

use crate::errors::{PartialFailure, SweepError, SweepResult};
use crate::models::bucket::BucketRef;
use crate::models::selector::ListScope;
use crate::models::upload::{DEFAULT_STORAGE_CLASS, UploadRecord};
use crate::services::api::{ListSessionsRequest, SessionSummary};
use crate::services::client::RetryingClient;
use crate::services::pool::WorkerPool;
use crate::services::region::RegionLookup;
use crate::services::registry::RegionalClientRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Records collected by a listing, plus the aggregate of buckets that failed.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub records: Vec<UploadRecord>,
    pub failure: Option<PartialFailure>,
}

impl Listing {
    pub fn complete(records: Vec<UploadRecord>) -> Self {
        Self {
            records,
            failure: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Collapse into the records, or the aggregate error when any bucket failed.
    pub fn into_result(self) -> SweepResult<Vec<UploadRecord>> {
        match self.failure {
            Some(failure) => Err(failure.into()),
            None => Ok(self.records),
        }
    }
}

#[async_trait]
pub trait UploadLister: Send + Sync {
    async fn list(&self, scope: &ListScope, cancel: &CancellationToken) -> SweepResult<Listing>;
}

#[derive(Clone)]
pub struct UploadCollector {
    client: Arc<RetryingClient>,
    resolver: Arc<dyn RegionLookup>,
    registry: Arc<RegionalClientRegistry>,
    pool: WorkerPool,
}

impl UploadCollector {
    pub fn new(
        client: Arc<RetryingClient>,
        resolver: Arc<dyn RegionLookup>,
        registry: Arc<RegionalClientRegistry>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            client,
            resolver,
            registry,
            pool,
        }
    }

    /// Page through one bucket's uploads using the client for its region.
    ///
    /// With a cap, each request asks for at most the remaining count and
    /// paging stops once the cap is reached.
    pub async fn list_bucket(
        &self,
        bucket: &BucketRef,
        cap: Option<usize>,
        cancel: &CancellationToken,
    ) -> SweepResult<Vec<UploadRecord>> {
        let client = self.registry.client_for(&bucket.region).await?;
        let mut request = ListSessionsRequest::new(&bucket.name);
        let mut records = Vec::new();

        loop {
            if let Some(cap) = cap {
                let remaining = cap.saturating_sub(records.len());
                if remaining == 0 {
                    break;
                }
                request.max_uploads = Some(i32::try_from(remaining).unwrap_or(i32::MAX));
            }

            let page = client.list_upload_sessions(&request, cancel).await?;
            for session in page.sessions {
                match record_from_session(bucket, session) {
                    Some(record) => records.push(record),
                    None => debug!(bucket = %bucket.name, "skipping upload with missing fields"),
                }
            }

            if let Some(cap) = cap
                && records.len() >= cap
            {
                records.truncate(cap);
                break;
            }
            if !page.is_truncated {
                break;
            }
            if page.next_key_marker.is_none() && page.next_upload_id_marker.is_none() {
                warn!(bucket = %bucket.name, "truncated page without continuation markers");
                break;
            }
            request.key_marker = page.next_key_marker;
            request.upload_id_marker = page.next_upload_id_marker;
        }

        debug!(bucket = %bucket.name, region = %bucket.region, uploads = records.len(), "listed bucket");
        Ok(records)
    }

    async fn list_single(
        &self,
        name: &str,
        scope: &ListScope,
        cancel: &CancellationToken,
    ) -> SweepResult<Listing> {
        let bucket = self.resolver.resolve(name, cancel).await?;
        let records = self.list_bucket(&bucket, scope.collection_cap(), cancel).await?;
        Ok(Listing::complete(scope.paginate(records)))
    }

    async fn list_all(&self, scope: &ListScope, cancel: &CancellationToken) -> SweepResult<Listing> {
        let names = self.client.list_buckets(cancel).await?;
        let mut failures = Vec::new();

        let resolver = Arc::clone(&self.resolver);
        let token = cancel.clone();
        let resolved = self
            .pool
            .run(names, cancel, move |name: String| {
                let resolver = Arc::clone(&resolver);
                let cancel = token.clone();
                async move { resolver.resolve(&name, &cancel).await }
            })
            .await;

        let mut targets = Vec::new();
        for outcome in resolved {
            match outcome {
                Ok(bucket) if scope.region.as_deref().is_none_or(|r| r == bucket.region) => {
                    targets.push(bucket)
                }
                Ok(bucket) => debug!(bucket = %bucket.name, region = %bucket.region, "outside requested region"),
                Err(err) => failures.push(err),
            }
        }
        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }
        // Buckets outside the requested region were never attempted.
        let total = targets.len() + failures.len();

        let collector = self.clone();
        let cap = scope.collection_cap();
        let token = cancel.clone();
        let listed = self
            .pool
            .run(targets, cancel, move |bucket: BucketRef| {
                let collector = collector.clone();
                let cancel = token.clone();
                async move { collector.list_bucket(&bucket, cap, &cancel).await }
            })
            .await;

        let mut records = Vec::new();
        for outcome in listed {
            match outcome {
                Ok(mut found) => records.append(&mut found),
                Err(err) => failures.push(err),
            }
        }
        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        for err in failures.iter().take(crate::errors::MAX_FAILURE_SAMPLES) {
            warn!(error = %err, "failed to list uploads for bucket");
        }
        let failure = PartialFailure::from_errors(total, &failures);
        if let Some(failure) = &failure {
            warn!(
                failed = failure.failed,
                total = failure.total,
                "failed to list uploads for some buckets"
            );
        }
        info!(buckets = total, uploads = records.len(), "collected uploads");

        Ok(Listing {
            records: scope.paginate(records),
            failure,
        })
    }
}

#[async_trait]
impl UploadLister for UploadCollector {
    async fn list(&self, scope: &ListScope, cancel: &CancellationToken) -> SweepResult<Listing> {
        scope.validate()?;
        match &scope.bucket {
            Some(name) => self.list_single(name, scope, cancel).await,
            None => self.list_all(scope, cancel).await,
        }
    }
}

/// Convert a provider session; sessions missing key, id or start time are dropped.
fn record_from_session(bucket: &BucketRef, session: SessionSummary) -> Option<UploadRecord> {
    let key = session.key?;
    let upload_id = session.upload_id?;
    let initiated = session.initiated?;
    let storage_class = session
        .storage_class
        .filter(|class| !class.is_empty())
        .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string());

    Some(
        UploadRecord::new(&bucket.name, key, upload_id, initiated, &bucket.region)
            .with_storage_class(storage_class),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::region::RegionResolver;
    use crate::services::testing::{FakeApi, FakeFactory, fast_client};
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn collector(api: &Arc<FakeApi>, concurrency: usize) -> UploadCollector {
        let client = Arc::new(fast_client(api.clone()));
        let resolver = Arc::new(RegionResolver::new(client.clone()));
        let registry = Arc::new(RegionalClientRegistry::new(Arc::new(FakeFactory::new(
            api.clone(),
        ))));
        UploadCollector::new(client, resolver, registry, WorkerPool::new(concurrency))
    }

    fn api_with_buckets(count: usize) -> FakeApi {
        let now = Utc::now();
        let mut api = FakeApi::new();
        for i in 0..count {
            let bucket = format!("bucket-{i}");
            api = api
                .with_bucket(&bucket, Some("eu-west-1"))
                .with_upload(&bucket, "key", &format!("upload-{i}"), now);
        }
        api
    }

    #[tokio::test]
    async fn failing_bucket_is_reported_alongside_partial_results() {
        let now = Utc::now() - TimeDelta::days(1);
        let api = Arc::new(
            FakeApi::new()
                .with_bucket("a", None)
                .with_bucket("b", Some("eu-west-1"))
                .with_bucket("c", None)
                .with_upload("a", "k1", "u1", now)
                .with_upload("a", "k2", "u2", now)
                .with_upload("c", "k3", "u3", now)
                .failing_listing("b"),
        );

        let listing = collector(&api, 4)
            .list(&ListScope::all(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(listing.records.len(), 3);
        let failure = listing.failure.clone().expect("one bucket failed");
        assert_eq!((failure.failed, failure.total), (1, 3));
        assert!(failure.samples[0].contains("ListMultipartUploads(b)"));
        assert!(listing.into_result().is_err());
    }

    #[tokio::test]
    async fn region_filter_keeps_matching_buckets_only() {
        let now = Utc::now();
        let api = Arc::new(
            FakeApi::new()
                .with_bucket("eu", Some("eu-west-1"))
                .with_bucket("us", None)
                .with_upload("eu", "k", "u-eu", now)
                .with_upload("us", "k", "u-us", now),
        );

        let listing = collector(&api, 2)
            .list(&ListScope::all().in_region("us-east-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(listing.is_complete());
        assert_eq!(listing.records.len(), 1);
        assert_eq!(listing.records[0].upload_id, "u-us");
        assert_eq!(listing.records[0].region, "us-east-1");
    }

    #[tokio::test]
    async fn failure_total_counts_only_buckets_in_region() {
        let now = Utc::now();
        let mut api = FakeApi::new();
        for i in 0..3 {
            let bucket = format!("eu-{i}");
            api = api
                .with_bucket(&bucket, Some("eu-west-1"))
                .with_upload(&bucket, "k", &format!("u-eu-{i}"), now);
        }
        for i in 0..7 {
            let bucket = format!("us-{i}");
            api = api
                .with_bucket(&bucket, None)
                .with_upload(&bucket, "k", &format!("u-us-{i}"), now);
        }
        let api = Arc::new(api.failing_listing("eu-1"));

        let listing = collector(&api, 4)
            .list(&ListScope::all().in_region("eu-west-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(listing.records.len(), 2);
        let failure = listing.failure.expect("eu-1 failed");
        assert_eq!((failure.failed, failure.total), (1, 3));
        assert!(failure.to_string().starts_with("1 of 3 buckets failed"));
    }

    #[tokio::test]
    async fn pagination_follows_markers_and_skips_incomplete_sessions() {
        let now = Utc::now();
        let mut api = FakeApi::new()
            .with_bucket("big", None)
            .with_page_size(2)
            .with_session("big", SessionSummary::default());
        for i in 0..5 {
            api = api.with_upload("big", &format!("k{i}"), &format!("u{i}"), now);
        }
        let api = Arc::new(api);

        let listing = collector(&api, 1)
            .list(&ListScope::bucket("big"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(listing.records.len(), 5);
        assert_eq!(api.calls.list_sessions.load(Ordering::SeqCst), 3);
        assert!(listing.records.iter().all(|r| r.storage_class == DEFAULT_STORAGE_CLASS));
    }

    #[tokio::test]
    async fn max_results_caps_page_requests() {
        let now = Utc::now();
        let mut api = FakeApi::new().with_bucket("big", None).with_page_size(10);
        for i in 0..25 {
            api = api.with_upload("big", &format!("k{i}"), &format!("u{i}"), now);
        }
        let api = Arc::new(api);

        let listing = collector(&api, 1)
            .list(&ListScope::bucket("big").with_max_results(12), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(listing.records.len(), 12);
        assert_eq!(api.calls.list_sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn offset_skips_into_the_collected_set() {
        let now = Utc::now();
        let mut api = FakeApi::new().with_bucket("big", None).with_page_size(10);
        for i in 0..25 {
            api = api.with_upload("big", &format!("k{i}"), &format!("u{i}"), now);
        }
        let api = Arc::new(api);

        let scope = ListScope::bucket("big").with_offset(10).with_max_results(5);
        let listing = collector(&api, 1)
            .list(&scope, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = listing.records.iter().map(|r| r.upload_id.as_str()).collect();
        assert_eq!(ids, vec!["u10", "u11", "u12", "u13", "u14"]);
        assert_eq!(api.calls.list_sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listing_respects_concurrency_bound() {
        let api = Arc::new(api_with_buckets(10).with_list_delay(Duration::from_millis(10)));

        let listing = collector(&api, 2)
            .list(&ListScope::all(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(listing.records.len(), 10);
        assert!(api.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_listing_returns_cancelled() {
        let api = Arc::new(api_with_buckets(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = collector(&api, 2)
            .list(&ListScope::all(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn empty_bucket_name_is_rejected() {
        let api = Arc::new(FakeApi::new());
        let err = collector(&api, 1)
            .list(&ListScope::bucket(""), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Validation { .. }));
    }
}
