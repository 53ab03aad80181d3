//! In-memory provider and client factory used by unit tests.

use crate::errors::{SweepError, SweepResult};
use crate::services::api::{
    ApiError, ListPartsRequest, ListSessionsRequest, PartPage, PartSummary, SessionPage,
    SessionSummary, StorageApi,
};
use crate::services::client::RetryingClient;
use crate::services::registry::ClientFactory;
use crate::services::retry::RetryConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CallCounts {
    pub list_buckets: AtomicUsize,
    pub location: AtomicUsize,
    pub list_sessions: AtomicUsize,
    pub list_parts: AtomicUsize,
    pub abort: AtomicUsize,
}

pub struct FakeApi {
    buckets: Vec<(String, Option<String>)>,
    sessions: HashMap<String, Vec<SessionSummary>>,
    parts: HashMap<String, Vec<i64>>,
    page_size: usize,
    broken_listings: HashSet<String>,
    broken_locations: HashSet<String>,
    broken_uploads: HashSet<String>,
    transient_failures: AtomicU32,
    list_delay: Duration,
    abort_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: CallCounts,
    pub aborted: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            sessions: HashMap::new(),
            parts: HashMap::new(),
            page_size: 1000,
            broken_listings: HashSet::new(),
            broken_locations: HashSet::new(),
            broken_uploads: HashSet::new(),
            transient_failures: AtomicU32::new(0),
            list_delay: Duration::ZERO,
            abort_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: CallCounts::default(),
            aborted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bucket(mut self, name: &str, location: Option<&str>) -> Self {
        self.buckets
            .push((name.to_string(), location.map(str::to_string)));
        self
    }

    pub fn with_upload(self, bucket: &str, key: &str, upload_id: &str, initiated: DateTime<Utc>) -> Self {
        self.with_session(
            bucket,
            SessionSummary {
                key: Some(key.to_string()),
                upload_id: Some(upload_id.to_string()),
                initiated: Some(initiated),
                storage_class: None,
            },
        )
    }

    pub fn with_session(mut self, bucket: &str, session: SessionSummary) -> Self {
        self.sessions
            .entry(bucket.to_string())
            .or_default()
            .push(session);
        self
    }

    pub fn with_parts(mut self, upload_id: &str, sizes: &[i64]) -> Self {
        self.parts.insert(upload_id.to_string(), sizes.to_vec());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// The first `count` calls of any kind fail with `SlowDown`.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = delay;
        self
    }

    pub fn failing_listing(mut self, bucket: &str) -> Self {
        self.broken_listings.insert(bucket.to_string());
        self
    }

    pub fn failing_location(mut self, bucket: &str) -> Self {
        self.broken_locations.insert(bucket.to_string());
        self
    }

    pub fn failing_upload(mut self, upload_id: &str) -> Self {
        self.broken_uploads.insert(upload_id.to_string());
        self
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    fn maybe_throttle(&self) -> Result<(), ApiError> {
        let throttled = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(ApiError::service("SlowDown", "please reduce your request rate"));
        }
        Ok(())
    }

    fn denied(what: &str) -> ApiError {
        ApiError::service("AccessDenied", format!("access denied to {what}"))
    }

    fn upload_exists(&self, upload_id: &str) -> bool {
        self.sessions
            .values()
            .flatten()
            .any(|s| s.upload_id.as_deref() == Some(upload_id))
    }
}

#[async_trait]
impl StorageApi for FakeApi {
    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        self.calls.list_buckets.fetch_add(1, Ordering::SeqCst);
        self.maybe_throttle()?;
        Ok(self.buckets.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn get_bucket_location(&self, bucket: &str) -> Result<Option<String>, ApiError> {
        self.calls.location.fetch_add(1, Ordering::SeqCst);
        self.maybe_throttle()?;
        if self.broken_locations.contains(bucket) {
            return Err(Self::denied(bucket));
        }
        self.buckets
            .iter()
            .find(|(name, _)| name == bucket)
            .map(|(_, location)| location.clone())
            .ok_or_else(|| ApiError::not_found("NoSuchBucket", bucket))
    }

    async fn list_upload_sessions(
        &self,
        request: &ListSessionsRequest,
    ) -> Result<SessionPage, ApiError> {
        self.calls.list_sessions.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.maybe_throttle()?;
        if self.broken_listings.contains(&request.bucket) {
            return Err(Self::denied(&request.bucket));
        }

        let all = self.sessions.get(&request.bucket).cloned().unwrap_or_default();
        let start = match (&request.key_marker, &request.upload_id_marker) {
            (None, None) => 0,
            (key, upload_id) => all
                .iter()
                .position(|s| s.key == *key && s.upload_id == *upload_id)
                .map_or(all.len(), |i| i + 1),
        };
        let limit = request
            .max_uploads
            .map_or(self.page_size, |max| (max.max(0) as usize).min(self.page_size));
        let sessions: Vec<_> = all[start..].iter().take(limit).cloned().collect();
        let is_truncated = start + sessions.len() < all.len();
        let (next_key_marker, next_upload_id_marker) = match sessions.last() {
            Some(last) if is_truncated => (last.key.clone(), last.upload_id.clone()),
            _ => (None, None),
        };

        Ok(SessionPage {
            sessions,
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    async fn list_upload_parts(&self, request: &ListPartsRequest) -> Result<PartPage, ApiError> {
        self.calls.list_parts.fetch_add(1, Ordering::SeqCst);
        self.maybe_throttle()?;
        if self.broken_uploads.contains(&request.upload_id) {
            return Err(Self::denied(&request.upload_id));
        }

        let sizes = self.parts.get(&request.upload_id).cloned().unwrap_or_default();
        let start = request
            .part_number_marker
            .as_deref()
            .and_then(|marker| marker.parse::<usize>().ok())
            .unwrap_or(0);
        let parts: Vec<_> = sizes
            .iter()
            .enumerate()
            .skip(start)
            .take(self.page_size)
            .map(|(i, size)| PartSummary {
                part_number: Some(i as i32 + 1),
                size: Some(*size),
            })
            .collect();
        let end = start + parts.len();
        let is_truncated = end < sizes.len();

        Ok(PartPage {
            parts,
            is_truncated,
            next_part_number_marker: is_truncated.then(|| end.to_string()),
        })
    }

    async fn abort_upload(&self, bucket: &str, _key: &str, upload_id: &str) -> Result<(), ApiError> {
        self.calls.abort.fetch_add(1, Ordering::SeqCst);
        if !self.abort_delay.is_zero() {
            tokio::time::sleep(self.abort_delay).await;
        }
        self.maybe_throttle()?;
        if self.broken_uploads.contains(upload_id) {
            return Err(Self::denied(upload_id));
        }
        if !self.upload_exists(upload_id) {
            return Err(ApiError::not_found("NoSuchUpload", format!("{bucket}/{upload_id}")));
        }
        if let Ok(mut aborted) = self.aborted.lock() {
            aborted.push(upload_id.to_string());
        }
        Ok(())
    }
}

/// Client with a generous rate and millisecond backoff so tests stay fast.
pub fn fast_client(api: Arc<dyn StorageApi>) -> RetryingClient {
    RetryingClient::new(
        api,
        10_000.0,
        RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1)),
    )
}

/// Hands out clients over one shared fake, recording the regions requested.
pub struct FakeFactory {
    api: Arc<FakeApi>,
    failures_left: AtomicUsize,
    delay: Duration,
    pub regions: Mutex<Vec<String>>,
}

impl FakeFactory {
    pub fn new(api: Arc<FakeApi>) -> Self {
        Self {
            api,
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.regions.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(&self, region: &str) -> SweepResult<Arc<RetryingClient>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SweepError::ClientInit {
                region: region.to_string(),
                reason: "credentials unavailable".into(),
            });
        }
        if let Ok(mut regions) = self.regions.lock() {
            regions.push(region.to_string());
        }
        Ok(Arc::new(fast_client(self.api.clone())))
    }
}
