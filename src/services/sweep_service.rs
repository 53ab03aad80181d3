//! SweepService: the operations exposed to callers, wired over the
//! collector, size calculator, deletion engine and filter engine.

use crate::errors::SweepResult;
use crate::models::selector::{DeleteSelector, ListScope};
use crate::models::upload::UploadRecord;
use crate::models::{CostBreakdown, SizeReport};
use crate::services::age::{AgeDistribution, age_distribution, bucket_age_distribution};
use crate::services::collector::{Listing, UploadCollector, UploadLister};
use crate::services::cost::{CostEstimator, cost_breakdown};
use crate::services::deletion::{
    Confirmer, DeleteOutcome, DeletionEngine, ProgressReporter, UploadDeleter,
};
use crate::services::filter::{Filter, FilterEngine, QueryFilter};
use crate::services::pool::WorkerPool;
use crate::services::region::RegionResolver;
use crate::services::registry::{ClientFactory, RegionalClientRegistry};
use crate::services::s3_api::{ClientSettings, S3ClientFactory};
use crate::services::size::{SizeCalculator, SizedUploads, UploadSizer, summarize};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Caller-supplied collaborators for prompting, reporting and pricing.
#[derive(Clone)]
pub struct Collaborators {
    pub confirmer: Arc<dyn Confirmer>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub cost: Arc<dyn CostEstimator>,
}

#[derive(Clone)]
pub struct SweepService {
    lister: Arc<dyn UploadLister>,
    sizer: Arc<dyn UploadSizer>,
    deleter: Arc<dyn UploadDeleter>,
    filters: Arc<dyn FilterEngine>,
    cost: Arc<dyn CostEstimator>,
}

impl SweepService {
    pub fn new(
        lister: Arc<dyn UploadLister>,
        sizer: Arc<dyn UploadSizer>,
        deleter: Arc<dyn UploadDeleter>,
        filters: Arc<dyn FilterEngine>,
        cost: Arc<dyn CostEstimator>,
    ) -> Self {
        Self {
            lister,
            sizer,
            deleter,
            filters,
            cost,
        }
    }

    /// Wire the standard components over `factory`.
    ///
    /// `home_region` hosts the client used for bucket enumeration and
    /// location lookups; every other call goes through the client of the
    /// bucket's own region.
    pub async fn wire(
        factory: Arc<dyn ClientFactory>,
        home_region: &str,
        concurrency: usize,
        collaborators: Collaborators,
    ) -> SweepResult<Self> {
        let registry = Arc::new(RegionalClientRegistry::new(factory));
        let global = registry.client_for(home_region).await?;
        let pool = WorkerPool::new(concurrency);
        debug!(home_region, concurrency = pool.concurrency(), "wiring sweep service");

        let resolver = Arc::new(RegionResolver::new(Arc::clone(&global)));
        let collector = UploadCollector::new(global, resolver, Arc::clone(&registry), pool);
        let sizer = Arc::new(SizeCalculator::new(Arc::clone(&registry), pool));
        let deleter = DeletionEngine::new(
            registry,
            sizer.clone(),
            Arc::clone(&collaborators.cost),
            collaborators.confirmer,
            collaborators.reporter,
            pool,
        );

        Ok(Self::new(
            Arc::new(collector),
            sizer,
            Arc::new(deleter),
            Arc::new(QueryFilter),
            collaborators.cost,
        ))
    }

    /// Wire against the real S3 API.
    pub async fn connect(
        settings: ClientSettings,
        home_region: &str,
        concurrency: usize,
        collaborators: Collaborators,
    ) -> SweepResult<Self> {
        Self::wire(
            Arc::new(S3ClientFactory::new(settings)),
            home_region,
            concurrency,
            collaborators,
        )
        .await
    }

    pub async fn list_uploads(
        &self,
        scope: &ListScope,
        cancel: &CancellationToken,
    ) -> SweepResult<Listing> {
        self.lister.list(scope, cancel).await
    }

    pub async fn get_upload_size(
        &self,
        record: &UploadRecord,
        cancel: &CancellationToken,
    ) -> SweepResult<u64> {
        self.sizer.size_of(record, cancel).await
    }

    pub async fn size_uploads(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<SizedUploads> {
        self.sizer.size_all(records, cancel).await
    }

    pub async fn size_report(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<SizeReport> {
        let sized = self.sizer.size_all(records, cancel).await?;
        Ok(summarize(sized, self.cost.as_ref()))
    }

    /// Size `records` and price them by region and storage class.
    pub async fn cost_report(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<CostBreakdown> {
        let sized = self.sizer.size_all(records, cancel).await?;
        cost_breakdown(&sized.records, self.cost.as_ref())
    }

    /// Age bands for `records`, optionally restricted to one bucket.
    pub fn age_report(&self, records: &[UploadRecord], bucket: Option<&str>) -> AgeDistribution {
        match bucket {
            Some(bucket) => bucket_age_distribution(records, bucket, Utc::now()),
            None => age_distribution(records, Utc::now()),
        }
    }

    pub async fn delete_upload(
        &self,
        record: &UploadRecord,
        cancel: &CancellationToken,
    ) -> SweepResult<()> {
        self.deleter.delete_one(record, cancel).await
    }

    pub async fn delete_uploads(
        &self,
        records: Vec<UploadRecord>,
        selector: &DeleteSelector,
        cancel: &CancellationToken,
    ) -> SweepResult<DeleteOutcome> {
        self.deleter.delete(records, selector, cancel).await
    }

    pub fn parse_filter(&self, query: &str) -> SweepResult<Filter> {
        self.filters.parse(query)
    }

    pub fn validate_filter(&self, query: &str) -> SweepResult<()> {
        self.filters.validate(query)
    }

    pub fn apply_filter(&self, records: &[UploadRecord], filter: &Filter) -> Vec<UploadRecord> {
        self.filters.apply(records, filter)
    }
}
