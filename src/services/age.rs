//! Age banding for upload inventories.

use crate::models::upload::UploadRecord;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Uploads older than this are considered abandoned.
pub const STALE_AFTER: TimeDelta = TimeDelta::days(7);

/// Lower bound and label of each band, youngest first.
const BANDS: [(i64, &str); 6] = [
    (0, "< 1 day"),
    (1, "1 day - 1 week"),
    (7, "1 week - 1 month"),
    (30, "1 - 3 months"),
    (90, "3 - 6 months"),
    (180, "6 months+"),
];

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AgeBand {
    pub label: String,
    pub min_days: i64,
    /// Exclusive upper bound; `None` for the oldest band.
    pub max_days: Option<i64>,
    pub uploads: usize,
    pub size: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AgeDistribution {
    pub bands: Vec<AgeBand>,
    pub total_uploads: usize,
    /// Uploads past [`STALE_AFTER`].
    pub stale_uploads: usize,
    pub oldest: Option<DateTime<Utc>>,
}

/// Bucket `records` into fixed age bands as of `now`.
pub fn age_distribution(records: &[UploadRecord], now: DateTime<Utc>) -> AgeDistribution {
    let mut bands: Vec<AgeBand> = BANDS
        .iter()
        .enumerate()
        .map(|(i, (min_days, label))| AgeBand {
            label: label.to_string(),
            min_days: *min_days,
            max_days: BANDS.get(i + 1).map(|(next, _)| *next),
            uploads: 0,
            size: 0,
        })
        .collect();

    for record in records {
        let age = record.age_at(now);
        // future-dated uploads land in the youngest band
        let index = bands
            .iter()
            .rposition(|band| age >= TimeDelta::days(band.min_days))
            .unwrap_or(0);
        let band = &mut bands[index];
        band.uploads += 1;
        band.size += record.size;
    }

    AgeDistribution {
        bands,
        total_uploads: records.len(),
        stale_uploads: records.iter().filter(|r| is_stale(r, now)).count(),
        oldest: records.iter().map(|r| r.initiated).min(),
    }
}

/// Distribution over the uploads of one bucket only.
pub fn bucket_age_distribution(
    records: &[UploadRecord],
    bucket: &str,
    now: DateTime<Utc>,
) -> AgeDistribution {
    let scoped: Vec<UploadRecord> = records
        .iter()
        .filter(|record| record.bucket == bucket)
        .cloned()
        .collect();
    age_distribution(&scoped, now)
}

pub fn is_stale(record: &UploadRecord, now: DateTime<Utc>) -> bool {
    record.age_at(now) > STALE_AFTER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged(days: i64, now: DateTime<Utc>) -> UploadRecord {
        UploadRecord::new("b", "k", "u", now - TimeDelta::days(days), "us-east-1").with_size(1)
    }

    #[test]
    fn records_fall_into_expected_bands() {
        let now = Utc::now();
        let records = [aged(0, now), aged(3, now), aged(10, now), aged(45, now), aged(400, now)];

        let distribution = age_distribution(&records, now);
        let counts: Vec<_> = distribution.bands.iter().map(|b| b.uploads).collect();
        assert_eq!(counts, vec![1, 1, 1, 1, 0, 1]);
        assert_eq!(distribution.total_uploads, 5);
        assert_eq!(distribution.stale_uploads, 3);
        assert_eq!(distribution.oldest, Some(now - TimeDelta::days(400)));
        assert_eq!(distribution.bands[5].max_days, None);
    }

    #[test]
    fn bucket_scope_ignores_other_buckets() {
        let now = Utc::now();
        let mut other = aged(3, now);
        other.bucket = "other".into();
        let distribution = bucket_age_distribution(&[aged(3, now), other], "b", now);
        assert_eq!(distribution.total_uploads, 1);
        assert_eq!(distribution.bands[1].uploads, 1);
    }

    #[test]
    fn staleness_starts_after_a_week() {
        let now = Utc::now();
        assert!(!is_stale(&aged(7, now), now));
        assert!(is_stale(&aged(8, now), now));
    }
}
