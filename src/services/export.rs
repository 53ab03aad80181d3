//! CSV and JSON exports of upload listings and dry-run previews.

use crate::errors::{SweepError, SweepResult};
use crate::models::report::DryRunReport;
use crate::models::upload::UploadRecord;
use crate::services::cost::CostEstimator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const UPLOAD_COLUMNS: [&str; 8] = [
    "bucket",
    "key",
    "upload_id",
    "initiated",
    "age_days",
    "size",
    "storage_class",
    "region",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// `.csv` files get CSV; everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

#[derive(Serialize)]
struct UploadExport<'a> {
    exported_at: DateTime<Utc>,
    total_count: usize,
    uploads: &'a [UploadRecord],
}

fn upload_row(record: &UploadRecord, now: DateTime<Utc>) -> Vec<String> {
    vec![
        record.bucket.clone(),
        record.key.clone(),
        record.upload_id.clone(),
        record.initiated.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        record.age_at(now).num_days().to_string(),
        record.size.to_string(),
        record.storage_class.clone(),
        record.region.clone(),
    ]
}

fn write_uploads_csv<W: Write>(
    writer: W,
    records: &[UploadRecord],
    now: DateTime<Utc>,
) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(UPLOAD_COLUMNS)?;
    for record in records {
        out.write_record(upload_row(record, now))?;
    }
    out.flush()?;
    Ok(())
}

fn write_dry_run_csv<W: Write>(
    writer: W,
    report: &DryRunReport,
    cost: &dyn CostEstimator,
) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(UPLOAD_COLUMNS.iter().chain(&["estimated_monthly_cost"]))?;
    for record in &report.uploads {
        let estimate = cost
            .monthly_cost(std::slice::from_ref(record))
            .unwrap_or_default();
        let mut row = upload_row(record, report.generated_at);
        row.push(format!("{estimate:.6}"));
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

fn export_error(path: &Path, reason: impl ToString) -> SweepError {
    SweepError::Export {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Create `path` and any missing parent directories.
fn create(path: &Path) -> SweepResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| export_error(path, err))?;
    }
    let file = File::create(path).map_err(|err| export_error(path, err))?;
    Ok(BufWriter::new(file))
}

/// Write `records` to `path` in the format its extension implies.
pub fn export_uploads(path: &Path, records: &[UploadRecord]) -> SweepResult<ExportFormat> {
    let format = ExportFormat::from_path(path);
    let mut writer = create(path)?;
    let now = Utc::now();

    match format {
        ExportFormat::Csv => {
            write_uploads_csv(&mut writer, records, now).map_err(|err| export_error(path, err))?
        }
        ExportFormat::Json => {
            let export = UploadExport {
                exported_at: now,
                total_count: records.len(),
                uploads: records,
            };
            serde_json::to_writer_pretty(&mut writer, &export)
                .map_err(|err| export_error(path, err))?;
        }
    }
    writer.flush().map_err(|err| export_error(path, err))?;

    info!(path = %path.display(), uploads = records.len(), ?format, "exported uploads");
    Ok(format)
}

/// Save a dry-run preview. CSV output carries one row per upload with its
/// estimated monthly cost; JSON output is the full report.
pub fn save_dry_run(
    path: &Path,
    report: &DryRunReport,
    cost: &dyn CostEstimator,
) -> SweepResult<ExportFormat> {
    let format = ExportFormat::from_path(path);
    let mut writer = create(path)?;

    match format {
        ExportFormat::Csv => {
            write_dry_run_csv(&mut writer, report, cost).map_err(|err| export_error(path, err))?
        }
        ExportFormat::Json => serde_json::to_writer_pretty(&mut writer, report)
            .map_err(|err| export_error(path, err))?,
    }
    writer.flush().map_err(|err| export_error(path, err))?;

    info!(path = %path.display(), uploads = report.total_uploads, ?format, "saved dry run");
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cost::FlatRateEstimator;
    use chrono::TimeDelta;
    use std::collections::BTreeMap;

    fn records(now: DateTime<Utc>) -> Vec<UploadRecord> {
        vec![
            UploadRecord::new("logs", "a,b.txt", "u1", now - TimeDelta::days(3), "us-east-1")
                .with_size(2048),
            UploadRecord::new("media", "clip.mp4", "u2", now - TimeDelta::days(40), "eu-west-1")
                .with_size(1024 * 1024 * 1024),
        ]
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("out/report.CSV")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("report.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("report")), ExportFormat::Json);
    }

    #[test]
    fn csv_rows_quote_keys_with_commas() {
        let now = Utc::now();
        let mut buffer = Vec::new();
        write_uploads_csv(&mut buffer, &records(now), now).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "bucket,key,upload_id,initiated,age_days,size,storage_class,region");
        assert!(lines[1].starts_with("logs,\"a,b.txt\",u1,"));
        assert!(lines[1].ends_with(",3,2048,STANDARD,us-east-1"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn json_export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("uploads.json");
        let now = Utc::now();

        let format = export_uploads(&path, &records(now)).unwrap();
        assert_eq!(format, ExportFormat::Json);

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_count"], 2);
        assert_eq!(value["uploads"][1]["upload_id"], "u2");
    }

    #[test]
    fn dry_run_csv_adds_cost_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.csv");
        let now = Utc::now();
        let uploads = records(now);
        let report = DryRunReport {
            total_uploads: uploads.len(),
            total_size: uploads.iter().map(|r| r.size).sum(),
            estimated_monthly_savings: 0.023,
            currency: "USD".into(),
            by_bucket: BTreeMap::new(),
            by_region: BTreeMap::new(),
            by_storage_class: BTreeMap::new(),
            filters: "age>1d".into(),
            generated_at: now,
            uploads,
        };

        save_dry_run(&path, &report, &FlatRateEstimator::default()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].ends_with(",region,estimated_monthly_cost"));
        assert!(lines[2].ends_with(",0.023000"));
    }
}
