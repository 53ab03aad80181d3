//! Bulk abort of incomplete uploads with preview, confirmation and progress.
//!
//! A delete request is validated, narrowed by its selector, then either
//! previewed (dry run) or executed over the worker pool. Execution publishes a
//! progress snapshot on a fixed interval and one final snapshot when done.

use crate::errors::{SweepError, SweepResult};
use crate::models::progress::{
    DeletionFailure, DeletionResult, MAX_REPORTED_FAILURES, ProgressState,
};
use crate::models::report::{BreakdownBuilder, DryRunReport, format_bytes};
use crate::models::selector::DeleteSelector;
use crate::models::upload::UploadRecord;
use crate::services::cost::CostEstimator;
use crate::services::pool::WorkerPool;
use crate::services::registry::RegionalClientRegistry;
use crate::services::size::UploadSizer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Per-bucket breakdown is shown in the prompt up to this many buckets.
const MAX_PROMPT_BUCKETS: usize = 10;

/// What a finished delete request produced.
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    DryRun(DryRunReport),
    Deleted(DeletionResult),
}

/// Receives progress, completion and dry-run events.
pub trait ProgressReporter: Send + Sync {
    fn progress(&self, state: &ProgressState);
    fn completed(&self, result: &DeletionResult);
    fn dry_run(&self, report: &DryRunReport);
}

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionSummary {
    pub uploads: usize,
    pub total_size: u64,
    pub per_bucket: BTreeMap<String, usize>,
}

impl DeletionSummary {
    pub fn new(records: &[UploadRecord]) -> Self {
        let mut per_bucket = BTreeMap::new();
        for record in records {
            *per_bucket.entry(record.bucket.clone()).or_insert(0) += 1;
        }
        Self {
            uploads: records.len(),
            total_size: records.iter().map(|r| r.size).sum(),
            per_bucket,
        }
    }

    pub fn prompt(&self) -> String {
        let mut text = format!(
            "About to delete {} incomplete multipart uploads ({}).\n",
            self.uploads,
            format_bytes(self.total_size)
        );
        if self.per_bucket.len() <= MAX_PROMPT_BUCKETS {
            for (bucket, count) in &self.per_bucket {
                let _ = writeln!(text, "  {bucket}: {count} uploads");
            }
        }
        text.push_str("Proceed? [y/N]: ");
        text
    }
}

/// Asks whether a deletion may proceed.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, summary: &DeletionSummary) -> SweepResult<bool>;
}

/// Writes the summary to `writer` and reads a yes/no line from `reader`.
///
/// Only `y` or `yes` (any case) approve; anything else, including end of
/// input, declines.
pub struct PromptConfirmer<R, W> {
    io: tokio::sync::Mutex<(R, W)>,
}

impl PromptConfirmer<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> PromptConfirmer<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: tokio::sync::Mutex::new((reader, writer)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }
}

#[async_trait]
impl<R, W> Confirmer for PromptConfirmer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, summary: &DeletionSummary) -> SweepResult<bool> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        writer.write_all(summary.prompt().as_bytes()).await?;
        writer.flush().await?;

        let mut answer = String::new();
        reader.read_line(&mut answer).await?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}

/// Publishes deletion events as structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn progress(&self, state: &ProgressState) {
        info!(
            processed = state.processed,
            total = state.total,
            succeeded = state.succeeded,
            failed = state.failed,
            percent = %format!("{:.1}", state.percent()),
            bucket = %state.current_bucket,
            elapsed_secs = state.elapsed.as_secs_f64(),
            "deletion progress"
        );
    }

    fn completed(&self, result: &DeletionResult) {
        info!(
            processed = result.total_processed,
            succeeded = result.succeeded,
            failed = result.failed,
            freed = %format_bytes(result.bytes_freed),
            duration_secs = result.duration.as_secs_f64(),
            "deletion complete"
        );
        for failure in &result.errors {
            warn!(
                bucket = %failure.bucket,
                key = %failure.key,
                upload_id = %failure.upload_id,
                error = %failure.error,
                "upload not deleted"
            );
        }
    }

    fn dry_run(&self, report: &DryRunReport) {
        info!(
            uploads = report.total_uploads,
            size = %format_bytes(report.total_size),
            monthly_savings = report.estimated_monthly_savings,
            currency = %report.currency,
            filters = %report.filters,
            "dry run: nothing deleted"
        );
        for (bucket, totals) in &report.by_bucket {
            info!(bucket = %bucket, uploads = totals.uploads, size = %format_bytes(totals.size), "dry run bucket");
        }
    }
}

/// Shared counters updated by deletion workers.
struct DeletionTracker {
    total: usize,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    bytes_freed: AtomicU64,
    current_bucket: Mutex<String>,
    errors: Mutex<Vec<DeletionFailure>>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl DeletionTracker {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            bytes_freed: AtomicU64::new(0),
            current_bucket: Mutex::new(String::new()),
            errors: Mutex::new(Vec::new()),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn begin(&self, bucket: &str) {
        let mut current = self.current_bucket.lock().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(bucket);
    }

    fn record_success(&self, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.bytes_freed.fetch_add(bytes, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self, failure: Option<DeletionFailure>) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = failure {
            let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            if errors.len() < MAX_REPORTED_FAILURES {
                errors.push(failure);
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn errors(&self) -> Vec<DeletionFailure> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn snapshot(&self) -> ProgressState {
        ProgressState {
            total: self.total,
            processed: self.processed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            current_bucket: self
                .current_bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            errors: self.errors(),
        }
    }

    fn finish(&self) -> DeletionResult {
        DeletionResult {
            total_processed: self.processed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            bytes_freed: self.bytes_freed.load(Ordering::SeqCst),
            duration: self.started.elapsed(),
            errors: self.errors(),
        }
    }
}

#[async_trait]
pub trait UploadDeleter: Send + Sync {
    /// Abort a single upload through its region's client.
    async fn delete_one(&self, record: &UploadRecord, cancel: &CancellationToken) -> SweepResult<()>;

    /// Select, preview or confirm, then abort the matching uploads.
    async fn delete(
        &self,
        records: Vec<UploadRecord>,
        selector: &DeleteSelector,
        cancel: &CancellationToken,
    ) -> SweepResult<DeleteOutcome>;
}

#[derive(Clone)]
pub struct DeletionEngine {
    registry: Arc<RegionalClientRegistry>,
    sizer: Arc<dyn UploadSizer>,
    cost: Arc<dyn CostEstimator>,
    confirmer: Arc<dyn Confirmer>,
    reporter: Arc<dyn ProgressReporter>,
    pool: WorkerPool,
    progress_interval: Duration,
}

impl DeletionEngine {
    pub fn new(
        registry: Arc<RegionalClientRegistry>,
        sizer: Arc<dyn UploadSizer>,
        cost: Arc<dyn CostEstimator>,
        confirmer: Arc<dyn Confirmer>,
        reporter: Arc<dyn ProgressReporter>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            registry,
            sizer,
            cost,
            confirmer,
            reporter,
            pool,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Look up sizes for records that have none yet.
    ///
    /// Returns the `(bucket, upload_id)` keys whose size could not be read.
    async fn fill_missing_sizes(
        &self,
        records: &mut [UploadRecord],
        cancel: &CancellationToken,
    ) -> SweepResult<HashSet<(String, String)>> {
        let missing: Vec<UploadRecord> = records.iter().filter(|r| r.size == 0).cloned().collect();
        if missing.is_empty() {
            return Ok(HashSet::new());
        }

        let sized = self.sizer.size_all(missing, cancel).await?;
        let found: HashMap<(String, String), u64> = sized
            .records
            .into_iter()
            .map(|r| ((r.bucket, r.upload_id), r.size))
            .collect();

        let mut unknown = HashSet::new();
        for record in records.iter_mut().filter(|r| r.size == 0) {
            let key = (record.bucket.clone(), record.upload_id.clone());
            match found.get(&key) {
                Some(size) => record.size = *size,
                None => {
                    unknown.insert(key);
                }
            }
        }
        Ok(unknown)
    }

    fn preview(
        &self,
        records: Vec<UploadRecord>,
        selector: &DeleteSelector,
        now: DateTime<Utc>,
    ) -> DryRunReport {
        let mut breakdown = BreakdownBuilder::default();
        for record in &records {
            let saving = self
                .cost
                .monthly_cost(std::slice::from_ref(record))
                .unwrap_or_default();
            breakdown.add(record, saving);
        }
        let savings = self.cost.monthly_cost(&records).unwrap_or_else(|err| {
            warn!(error = %err, "cost estimation failed, reporting zero savings");
            0.0
        });

        DryRunReport {
            total_uploads: records.len(),
            total_size: records.iter().map(|r| r.size).sum(),
            estimated_monthly_savings: savings,
            currency: self.cost.currency().to_string(),
            by_bucket: breakdown.by_bucket,
            by_region: breakdown.by_region,
            by_storage_class: breakdown.by_storage_class,
            filters: selector.describe(),
            generated_at: now,
            uploads: records,
        }
    }

    fn spawn_ticker(&self, tracker: Arc<DeletionTracker>, stop: CancellationToken) -> JoinHandle<()> {
        let reporter = Arc::clone(&self.reporter);
        let period = self.progress_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => reporter.progress(&tracker.snapshot()),
                }
            }
        })
    }

    async fn execute(
        &self,
        records: Vec<UploadRecord>,
        cancel: &CancellationToken,
    ) -> SweepResult<DeletionResult> {
        let tracker = Arc::new(DeletionTracker::new(records.len()));
        let stop = cancel.child_token();
        let ticker = self.spawn_ticker(Arc::clone(&tracker), stop.clone());
        info!(uploads = records.len(), concurrency = self.pool.concurrency(), "starting deletion");

        let engine = self.clone();
        let shared = Arc::clone(&tracker);
        let token = cancel.clone();
        let outcomes = self
            .pool
            .run(records, cancel, move |record: UploadRecord| {
                let engine = engine.clone();
                let tracker = Arc::clone(&shared);
                let cancel = token.clone();
                async move {
                    tracker.begin(&record.bucket);
                    match engine.delete_one(&record, &cancel).await {
                        Ok(()) => {
                            tracker.record_success(record.size);
                            Ok(())
                        }
                        Err(err) => {
                            debug!(bucket = %record.bucket, key = %record.key, error = %err, "abort failed");
                            tracker.record_failure(Some(DeletionFailure::new(&record, &err)));
                            Err(err)
                        }
                    }
                }
            })
            .await;

        for outcome in &outcomes {
            if let Err(SweepError::Worker(reason)) = outcome {
                warn!(reason = %reason, "deletion worker failed");
                tracker.record_failure(None);
            }
        }

        stop.cancel();
        if let Err(err) = ticker.await {
            debug!(error = %err, "progress ticker ended abnormally");
        }
        self.reporter.progress(&tracker.snapshot());

        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        let result = tracker.finish();
        self.reporter.completed(&result);
        Ok(result)
    }
}

#[async_trait]
impl UploadDeleter for DeletionEngine {
    async fn delete_one(&self, record: &UploadRecord, cancel: &CancellationToken) -> SweepResult<()> {
        record.validate()?;
        let client = self.registry.client_for(&record.region).await?;
        client
            .abort_upload(&record.bucket, &record.key, &record.upload_id, cancel)
            .await?;
        debug!(bucket = %record.bucket, key = %record.key, upload_id = %record.upload_id, "aborted upload");
        Ok(())
    }

    async fn delete(
        &self,
        records: Vec<UploadRecord>,
        selector: &DeleteSelector,
        cancel: &CancellationToken,
    ) -> SweepResult<DeleteOutcome> {
        selector.validate()?;
        let now = Utc::now();

        let mut selected: Vec<UploadRecord> = records
            .into_iter()
            .filter(|record| selector.matches_scope(record, now))
            .collect();

        if !selected.is_empty() && (selector.has_size_bounds() || selector.dry_run) {
            let unknown = self.fill_missing_sizes(&mut selected, cancel).await?;
            if selector.has_size_bounds() {
                selected.retain(|record| {
                    !unknown.contains(&(record.bucket.clone(), record.upload_id.clone()))
                        && selector.matches(record, now)
                });
            }
        }

        if selected.is_empty() {
            return Err(SweepError::NothingToDelete);
        }

        if selector.dry_run {
            let report = self.preview(selected, selector, now);
            self.reporter.dry_run(&report);
            return Ok(DeleteOutcome::DryRun(report));
        }

        if !selector.force {
            let summary = DeletionSummary::new(&selected);
            if !self.confirmer.confirm(&summary).await? {
                info!(uploads = summary.uploads, "deletion declined");
                return Err(SweepError::Declined);
            }
        }

        let result = self.execute(selected, cancel).await?;
        if result.failed > 0 {
            return Err(SweepError::PartialDeletion {
                failed: result.failed,
                total: result.total_processed,
            });
        }
        Ok(DeleteOutcome::Deleted(result))
    }
}
