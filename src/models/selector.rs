//! Scopes for listing and selectors for deletion.

use crate::errors::{SweepError, SweepResult};
use crate::models::report::{format_age, format_bytes};
use crate::models::upload::UploadRecord;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// What to enumerate: one bucket, or every bucket optionally narrowed to a region.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ListScope {
    /// Restrict to a single bucket. The region filter is ignored when set.
    pub bucket: Option<String>,

    /// Keep only buckets hosted in this region.
    pub region: Option<String>,

    /// Upper bound on records collected per bucket and returned overall.
    pub max_results: Option<usize>,

    /// Records to skip from the front of the merged result.
    pub offset: usize,
}

impl ListScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn bucket(name: impl Into<String>) -> Self {
        Self {
            bucket: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> SweepResult<()> {
        if self.bucket.as_deref().is_some_and(str::is_empty) {
            return Err(SweepError::invalid("bucket", "bucket name is empty"));
        }
        if self.region.as_deref().is_some_and(str::is_empty) {
            return Err(SweepError::invalid("region", "region is empty"));
        }
        if self.max_results == Some(0) {
            return Err(SweepError::invalid(
                "max_results",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Most records any single bucket needs to contribute before pagination.
    pub fn collection_cap(&self) -> Option<usize> {
        self.max_results.map(|max| max.saturating_add(self.offset))
    }

    /// Apply offset then limit to a merged result.
    pub fn paginate(&self, records: Vec<UploadRecord>) -> Vec<UploadRecord> {
        let limit = self.max_results.unwrap_or(usize::MAX);
        records.into_iter().skip(self.offset).take(limit).collect()
    }
}

/// Which uploads a delete request targets, and how it runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteSelector {
    pub bucket: Option<String>,

    /// Keep uploads at least this old.
    pub older_than: Option<TimeDelta>,

    /// Keep uploads strictly smaller than this many bytes.
    pub smaller_than: Option<u64>,

    /// Keep uploads strictly larger than this many bytes.
    pub larger_than: Option<u64>,

    /// Report what would be deleted without deleting.
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    pub force: bool,
}

impl DeleteSelector {
    /// Reject selectors that can never match anything.
    pub fn validate(&self) -> SweepResult<()> {
        if self.bucket.as_deref().is_some_and(str::is_empty) {
            return Err(SweepError::invalid("bucket", "bucket name is empty"));
        }
        if self.older_than.is_some_and(|age| age < TimeDelta::zero()) {
            return Err(SweepError::invalid("older_than", "cannot be negative"));
        }
        if let (Some(smaller), Some(larger)) = (self.smaller_than, self.larger_than)
            && smaller <= larger
        {
            return Err(SweepError::invalid(
                "size range",
                format!(
                    "smaller-than ({}) must be greater than larger-than ({})",
                    format_bytes(smaller),
                    format_bytes(larger)
                ),
            ));
        }
        Ok(())
    }

    pub fn has_size_bounds(&self) -> bool {
        self.smaller_than.is_some() || self.larger_than.is_some()
    }

    /// Bucket and age criteria; these need no size information.
    pub fn matches_scope(&self, record: &UploadRecord, now: DateTime<Utc>) -> bool {
        if let Some(bucket) = &self.bucket
            && record.bucket != *bucket
        {
            return false;
        }
        if let Some(min_age) = self.older_than
            && record.age_at(now) < min_age
        {
            return false;
        }
        true
    }

    pub fn matches_size(&self, record: &UploadRecord) -> bool {
        if self.smaller_than.is_some_and(|max| record.size >= max) {
            return false;
        }
        if self.larger_than.is_some_and(|min| record.size <= min) {
            return false;
        }
        true
    }

    pub fn matches(&self, record: &UploadRecord, now: DateTime<Utc>) -> bool {
        self.matches_scope(record, now) && self.matches_size(record)
    }

    /// Compact description such as `age>7d,size<100.0MB,bucket=logs`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(age) = self.older_than {
            parts.push(format!("age>{}", format_age(age)));
        }
        if let Some(bytes) = self.smaller_than {
            parts.push(format!("size<{}", format_bytes(bytes)));
        }
        if let Some(bytes) = self.larger_than {
            parts.push(format!("size>{}", format_bytes(bytes)));
        }
        if let Some(bucket) = &self.bucket {
            parts.push(format!("bucket={bucket}"));
        }
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bucket: &str, days: i64, size: u64, now: DateTime<Utc>) -> UploadRecord {
        UploadRecord::new(bucket, "k", "u", now - TimeDelta::days(days), "us-east-1")
            .with_size(size)
    }

    #[test]
    fn inverted_size_band_is_rejected() {
        let selector = DeleteSelector {
            smaller_than: Some(1024),
            larger_than: Some(1024),
            ..DeleteSelector::default()
        };
        assert!(matches!(
            selector.validate(),
            Err(SweepError::Validation { .. })
        ));
    }

    #[test]
    fn criteria_are_conjunctive() {
        let now = Utc::now();
        let selector = DeleteSelector {
            bucket: Some("logs".into()),
            older_than: Some(TimeDelta::days(7)),
            smaller_than: Some(100),
            ..DeleteSelector::default()
        };

        assert!(selector.matches(&record("logs", 8, 10, now), now));
        assert!(!selector.matches(&record("logs", 6, 10, now), now));
        assert!(!selector.matches(&record("other", 8, 10, now), now));
        assert!(!selector.matches(&record("logs", 8, 100, now), now));
    }

    #[test]
    fn describe_lists_active_criteria() {
        let selector = DeleteSelector {
            bucket: Some("x".into()),
            older_than: Some(TimeDelta::days(7)),
            smaller_than: Some(100 * 1024 * 1024),
            ..DeleteSelector::default()
        };
        assert_eq!(selector.describe(), "age>7d,size<100.0MB,bucket=x");
    }

    #[test]
    fn minute_ages_are_not_described_as_months() {
        let selector = DeleteSelector {
            older_than: Some(TimeDelta::minutes(30)),
            ..DeleteSelector::default()
        };
        assert_eq!(selector.describe(), "age>30min");
        assert!(crate::services::filter::parse_age("30min").is_err());
    }

    #[test]
    fn scope_paginates_after_merge() {
        let now = Utc::now();
        let records: Vec<_> = (0..5).map(|i| record("b", i, 0, now)).collect();
        let page = ListScope::all().with_offset(1).with_max_results(2).paginate(records);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].initiated, now - TimeDelta::days(1));
    }
}
