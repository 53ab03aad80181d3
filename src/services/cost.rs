//! Storage cost estimation for uploaded-but-unfinished parts.

use crate::errors::{SweepError, SweepResult};
use crate::models::report::{BreakdownBuilder, CostBreakdown};
use crate::models::upload::UploadRecord;
use std::collections::HashMap;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Monthly USD price per GB for common storage classes.
const DEFAULT_RATES: [(&str, f64); 8] = [
    ("STANDARD", 0.023),
    ("STANDARD_IA", 0.0125),
    ("ONEZONE_IA", 0.01),
    ("REDUCED_REDUNDANCY", 0.024),
    ("GLACIER", 0.004),
    ("GLACIER_IR", 0.004),
    ("DEEP_ARCHIVE", 0.00099),
    ("INTELLIGENT_TIERING", 0.0125),
];

/// Estimates what a set of uploads costs to keep for a month.
pub trait CostEstimator: Send + Sync {
    fn monthly_cost(&self, records: &[UploadRecord]) -> SweepResult<f64>;

    fn currency(&self) -> &str {
        "USD"
    }
}

/// Per-storage-class flat price per GB-month.
#[derive(Debug, Clone)]
pub struct FlatRateEstimator {
    rates: HashMap<String, f64>,
    fallback: Option<f64>,
}

impl Default for FlatRateEstimator {
    fn default() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|(class, rate)| (class.to_string(), *rate))
                .collect(),
            fallback: Some(0.023),
        }
    }
}

impl FlatRateEstimator {
    pub fn with_rate(mut self, storage_class: impl Into<String>, per_gb_month: f64) -> Self {
        self.rates.insert(storage_class.into(), per_gb_month);
        self
    }

    /// Unknown storage classes become an error instead of using the fallback.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    fn rate_for(&self, storage_class: &str) -> SweepResult<f64> {
        self.rates
            .get(storage_class)
            .copied()
            .or(self.fallback)
            .ok_or_else(|| {
                SweepError::invalid("storage class", format!("no price for `{storage_class}`"))
            })
    }
}

impl CostEstimator for FlatRateEstimator {
    fn monthly_cost(&self, records: &[UploadRecord]) -> SweepResult<f64> {
        records.iter().try_fold(0.0, |total, record| {
            let rate = self.rate_for(&record.storage_class)?;
            Ok(total + record.size as f64 / BYTES_PER_GB * rate)
        })
    }
}

/// Price every record and group the totals by region and storage class.
///
/// Any record the estimator cannot price fails the whole breakdown.
pub fn cost_breakdown(
    records: &[UploadRecord],
    estimator: &dyn CostEstimator,
) -> SweepResult<CostBreakdown> {
    let mut breakdown = BreakdownBuilder::default();
    let mut total = 0.0;
    for record in records {
        let cost = estimator.monthly_cost(std::slice::from_ref(record))?;
        breakdown.add(record, cost);
        total += cost;
    }

    Ok(CostBreakdown {
        total_uploads: records.len(),
        total_size: records.iter().map(|r| r.size).sum(),
        total_monthly_cost: total,
        currency: estimator.currency().to_string(),
        by_region: breakdown.by_region,
        by_storage_class: breakdown.by_storage_class,
    })
}
