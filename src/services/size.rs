//! Sums the parts of in-progress uploads.

use crate::errors::{SweepError, SweepResult};
use crate::models::report::{BreakdownBuilder, SizeReport};
use crate::models::upload::UploadRecord;
use crate::services::api::ListPartsRequest;
use crate::services::cost::CostEstimator;
use crate::services::pool::WorkerPool;
use crate::services::registry::RegionalClientRegistry;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sized records plus the buckets whose part listings could not be read.
#[derive(Debug, Clone, Default)]
pub struct SizedUploads {
    pub records: Vec<UploadRecord>,
    pub inaccessible_buckets: Vec<String>,
}

#[async_trait]
pub trait UploadSizer: Send + Sync {
    /// Total bytes of one upload's parts.
    async fn size_of(&self, record: &UploadRecord, cancel: &CancellationToken) -> SweepResult<u64>;

    /// Size every record. Records whose lookup fails are dropped and their
    /// bucket is reported once in `inaccessible_buckets`.
    async fn size_all(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<SizedUploads>;
}

#[derive(Clone)]
pub struct SizeCalculator {
    registry: Arc<RegionalClientRegistry>,
    pool: WorkerPool,
}

impl SizeCalculator {
    pub fn new(registry: Arc<RegionalClientRegistry>, pool: WorkerPool) -> Self {
        Self { registry, pool }
    }

    /// Size `records` and summarize them with an estimated monthly cost.
    pub async fn report(
        &self,
        records: Vec<UploadRecord>,
        cost: &dyn CostEstimator,
        cancel: &CancellationToken,
    ) -> SweepResult<SizeReport> {
        let sized = self.size_all(records, cancel).await?;
        Ok(summarize(sized, cost))
    }
}

/// Totals and per-bucket/per-class breakdowns of an already sized batch.
///
/// Cost estimation failures count as zero cost.
pub fn summarize(sized: SizedUploads, cost: &dyn CostEstimator) -> SizeReport {
    let mut breakdown = BreakdownBuilder::default();
    for record in &sized.records {
        let estimate = cost
            .monthly_cost(std::slice::from_ref(record))
            .unwrap_or_default();
        breakdown.add(record, estimate);
    }

    SizeReport {
        total_uploads: sized.records.len(),
        total_size: sized.records.iter().map(|r| r.size).sum(),
        estimated_monthly_cost: cost.monthly_cost(&sized.records).unwrap_or_default(),
        by_bucket: breakdown.by_bucket,
        by_storage_class: breakdown.by_storage_class,
        inaccessible_buckets: sized.inaccessible_buckets,
    }
}

#[async_trait]
impl UploadSizer for SizeCalculator {
    async fn size_of(&self, record: &UploadRecord, cancel: &CancellationToken) -> SweepResult<u64> {
        record.validate()?;
        let client = self.registry.client_for(&record.region).await?;
        let mut request = ListPartsRequest {
            bucket: record.bucket.clone(),
            key: record.key.clone(),
            upload_id: record.upload_id.clone(),
            part_number_marker: None,
        };

        let mut total: u64 = 0;
        loop {
            let page = client.list_upload_parts(&request, cancel).await?;
            total += page
                .parts
                .iter()
                .filter_map(|part| part.size)
                .map(|size| u64::try_from(size).unwrap_or(0))
                .sum::<u64>();

            if !page.is_truncated {
                break;
            }
            match page.next_part_number_marker {
                Some(marker) => request.part_number_marker = Some(marker),
                None => break,
            }
        }

        debug!(bucket = %record.bucket, upload_id = %record.upload_id, size = total, "sized upload");
        Ok(total)
    }

    async fn size_all(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<SizedUploads> {
        let sizer = self.clone();
        let token = cancel.clone();
        let outcomes = self
            .pool
            .run(records, cancel, move |record: UploadRecord| {
                let sizer = sizer.clone();
                let cancel = token.clone();
                async move {
                    let size = sizer.size_of(&record, &cancel).await;
                    Ok((record, size))
                }
            })
            .await;

        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        let mut sized = SizedUploads::default();
        let mut seen = HashSet::new();
        for outcome in outcomes {
            match outcome {
                Ok((mut record, Ok(size))) => {
                    record.size = size;
                    sized.records.push(record);
                }
                Ok((record, Err(err))) => {
                    warn!(bucket = %record.bucket, key = %record.key, error = %err, "failed to size upload");
                    if seen.insert(record.bucket.clone()) {
                        sized.inaccessible_buckets.push(record.bucket);
                    }
                }
                Err(err) => warn!(error = %err, "size worker failed"),
            }
        }
        Ok(sized)
    }
}
