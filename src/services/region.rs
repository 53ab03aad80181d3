//! Bucket-to-region resolution with a time-bounded cache.

use crate::errors::SweepResult;
use crate::models::bucket::BucketRef;
use crate::services::client::RetryingClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a resolved region is trusted.
pub const REGION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Resolves which region hosts a bucket.
#[async_trait]
pub trait RegionLookup: Send + Sync {
    async fn resolve(&self, bucket: &str, cancel: &CancellationToken) -> SweepResult<BucketRef>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub cached_regions: usize,
    pub ttl: Duration,
}

struct CachedRegion {
    region: String,
    resolved_at: Instant,
}

/// Looks up bucket locations through a global client and caches them.
///
/// Entries older than the TTL are refreshed on next use. Failed lookups are
/// never cached.
pub struct RegionResolver {
    client: Arc<RetryingClient>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedRegion>>,
}

impl RegionResolver {
    pub fn new(client: Arc<RetryingClient>) -> Self {
        Self::with_ttl(client, REGION_CACHE_TTL)
    }

    pub fn with_ttl(client: Arc<RetryingClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, bucket: &str) -> Option<String> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(bucket)
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .map(|entry| entry.region.clone())
    }

    pub fn clear(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            cached_regions: cache.len(),
            ttl: self.ttl,
        }
    }
}

#[async_trait]
impl RegionLookup for RegionResolver {
    async fn resolve(&self, bucket: &str, cancel: &CancellationToken) -> SweepResult<BucketRef> {
        if let Some(region) = self.cached(bucket) {
            return Ok(BucketRef::new(bucket, region));
        }

        let location = self.client.get_bucket_location(bucket, cancel).await?;
        let resolved = BucketRef::from_location(bucket, location.as_deref());
        debug!(bucket, region = %resolved.region, "resolved bucket region");

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                bucket.to_string(),
                CachedRegion {
                    region: resolved.region.clone(),
                    resolved_at: Instant::now(),
                },
            );
        Ok(resolved)
    }
}
