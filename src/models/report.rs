//! Aggregated views over a set of uploads: size totals and dry-run previews.

use crate::models::upload::UploadRecord;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Count, bytes and estimated monthly cost for one grouping key.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct GroupTotals {
    pub uploads: usize,
    pub size: u64,
    pub estimated_cost: f64,
}

impl GroupTotals {
    fn add(&mut self, record: &UploadRecord, cost: f64) {
        self.uploads += 1;
        self.size += record.size;
        self.estimated_cost += cost;
    }
}

/// Totals per grouping key, ordered by key.
pub type Breakdown = BTreeMap<String, GroupTotals>;

/// Accumulates per-record totals into bucket, region and storage-class breakdowns.
#[derive(Debug, Default)]
pub(crate) struct BreakdownBuilder {
    pub by_bucket: Breakdown,
    pub by_region: Breakdown,
    pub by_storage_class: Breakdown,
}

impl BreakdownBuilder {
    pub(crate) fn add(&mut self, record: &UploadRecord, cost: f64) {
        self.by_bucket
            .entry(record.bucket.clone())
            .or_default()
            .add(record, cost);
        self.by_region
            .entry(record.region.clone())
            .or_default()
            .add(record, cost);
        self.by_storage_class
            .entry(record.storage_class.clone())
            .or_default()
            .add(record, cost);
    }
}

/// Monthly storage cost of a batch of sized uploads.
#[derive(Serialize, Clone, Debug, Default)]
pub struct CostBreakdown {
    pub total_uploads: usize,
    pub total_size: u64,
    pub total_monthly_cost: f64,
    pub currency: String,
    pub by_region: Breakdown,
    pub by_storage_class: Breakdown,
}

/// Result of sizing a batch of uploads.
#[derive(Serialize, Clone, Debug, Default)]
pub struct SizeReport {
    pub total_uploads: usize,
    pub total_size: u64,
    pub estimated_monthly_cost: f64,
    pub by_bucket: Breakdown,
    pub by_storage_class: Breakdown,
    /// Buckets where at least one part listing failed.
    pub inaccessible_buckets: Vec<String>,
}

/// What a deletion would remove, without removing anything.
#[derive(Serialize, Clone, Debug)]
pub struct DryRunReport {
    pub total_uploads: usize,
    pub total_size: u64,
    pub estimated_monthly_savings: f64,
    pub currency: String,
    pub by_bucket: Breakdown,
    pub by_region: Breakdown,
    pub by_storage_class: Breakdown,
    /// Compact form of the selector that produced this set.
    pub filters: String,
    pub generated_at: DateTime<Utc>,
    pub uploads: Vec<UploadRecord>,
}

/// Human-readable byte count using 1024-based units (`1.5MB`, `512B`).
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes}B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1}{suffix}B", bytes as f64 / div as f64)
}

/// Largest whole unit of an age: `7d`, `5h`, `30m`, `12s`.
pub fn format_age(age: TimeDelta) -> String {
    if age.num_days() > 0 {
        format!("{}d", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h", age.num_hours())
    } else if age.num_minutes() > 0 {
        // `m` is months in filter queries
        format!("{}min", age.num_minutes())
    } else {
        format!("{}s", age.num_seconds())
    }
}
