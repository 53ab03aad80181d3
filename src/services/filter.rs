//! Query language for narrowing upload inventories.
//!
//! A query is a comma-separated conjunction of `field operator value`
//! conditions, e.g. `age>7d,size<100MB,storageClass=STANDARD`. Fields are
//! `age`, `size`, `storageClass`, `region` and `bucket`, each at most once.
//! Numeric fields accept `> < >= <= = !=`; text fields only `=` and `!=`.

use crate::errors::{SweepError, SweepResult};
use crate::models::upload::UploadRecord;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

/// Half-width of the window used for age equality.
pub const AGE_TOLERANCE: TimeDelta = TimeDelta::hours(1);

/// Longest symbols first so `>=` is never read as `>`.
const OPERATORS: [(&str, Operator); 6] = [
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    fn compare<T: PartialOrd>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One parsed condition: operator, the value as written, and its parsed form.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate<T> {
    pub op: Operator,
    pub raw: String,
    pub value: T,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub age: Option<Predicate<TimeDelta>>,
    pub size: Option<Predicate<u64>>,
    pub storage_class: Option<Predicate<String>>,
    pub region: Option<Predicate<String>>,
    pub bucket: Option<Predicate<String>>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.age.is_none()
            && self.size.is_none()
            && self.storage_class.is_none()
            && self.region.is_none()
            && self.bucket.is_none()
    }

    pub fn matches(&self, record: &UploadRecord, now: DateTime<Utc>) -> bool {
        if let Some(age) = &self.age
            && !age_matches(age, record.age_at(now))
        {
            return false;
        }
        if let Some(size) = &self.size
            && !size.op.compare(&record.size, &size.value)
        {
            return false;
        }
        [
            (&self.storage_class, &record.storage_class),
            (&self.region, &record.region),
            (&self.bucket, &record.bucket),
        ]
        .into_iter()
        .all(|(predicate, actual)| predicate.as_ref().is_none_or(|p| text_matches(p, actual)))
    }
}

fn age_matches(predicate: &Predicate<TimeDelta>, age: TimeDelta) -> bool {
    let threshold = predicate.value;
    match predicate.op {
        Operator::Eq => (age - threshold).abs() <= AGE_TOLERANCE,
        Operator::Ne => (age - threshold).abs() > AGE_TOLERANCE,
        op => op.compare(&age, &threshold),
    }
}

fn text_matches(predicate: &Predicate<String>, actual: &str) -> bool {
    let equal = actual.to_lowercase() == predicate.value.to_lowercase();
    match predicate.op {
        Operator::Ne => !equal,
        _ => equal,
    }
}

/// Parses, validates and applies filter queries.
pub trait FilterEngine: Send + Sync {
    fn parse(&self, query: &str) -> SweepResult<Filter>;

    fn validate(&self, query: &str) -> SweepResult<()> {
        self.parse(query).map(|_| ())
    }

    fn apply(&self, records: &[UploadRecord], filter: &Filter) -> Vec<UploadRecord>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFilter;

impl QueryFilter {
    /// Apply `filter` with ages measured against `now`.
    pub fn apply_at(
        &self,
        records: &[UploadRecord],
        filter: &Filter,
        now: DateTime<Utc>,
    ) -> Vec<UploadRecord> {
        if filter.is_empty() {
            return records.to_vec();
        }
        records
            .iter()
            .filter(|record| filter.matches(record, now))
            .cloned()
            .collect()
    }

    fn parse_condition(condition: &str, filter: &mut Filter) -> Result<(), String> {
        let (field, op, value) = split_condition(condition)
            .ok_or_else(|| "invalid syntax, expected 'field operator value'".to_string())?;
        let raw = value.to_string();

        match field.to_lowercase().as_str() {
            "age" => {
                ensure_unset(&filter.age, "age")?;
                let value = age_from(value)?;
                filter.age = Some(Predicate { op, raw, value });
            }
            "size" => {
                ensure_unset(&filter.size, "size")?;
                let value = size_from(value)?;
                filter.size = Some(Predicate { op, raw, value });
            }
            "storageclass" => {
                ensure_unset(&filter.storage_class, "storageClass")?;
                filter.storage_class = Some(text_predicate(op, raw, "storageClass")?);
            }
            "region" => {
                ensure_unset(&filter.region, "region")?;
                filter.region = Some(text_predicate(op, raw, "region")?);
            }
            "bucket" => {
                ensure_unset(&filter.bucket, "bucket")?;
                filter.bucket = Some(text_predicate(op, raw, "bucket")?);
            }
            other => {
                return Err(format!(
                    "unsupported field '{other}', supported fields: age, size, storageClass, region, bucket"
                ));
            }
        }
        Ok(())
    }
}

impl FilterEngine for QueryFilter {
    fn parse(&self, query: &str) -> SweepResult<Filter> {
        let mut filter = Filter::default();
        for condition in query.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            Self::parse_condition(condition, &mut filter).map_err(|reason| {
                SweepError::InvalidFilter {
                    condition: condition.to_string(),
                    reason,
                }
            })?;
        }
        Ok(filter)
    }

    fn apply(&self, records: &[UploadRecord], filter: &Filter) -> Vec<UploadRecord> {
        self.apply_at(records, filter, Utc::now())
    }
}

fn ensure_unset<T>(slot: &Option<T>, field: &str) -> Result<(), String> {
    match slot {
        Some(_) => Err(format!("{field} filter already specified")),
        None => Ok(()),
    }
}

fn text_predicate(op: Operator, raw: String, field: &str) -> Result<Predicate<String>, String> {
    if !op.is_equality() {
        return Err(format!(
            "invalid operator '{op}' for {field} field, supported: =, !="
        ));
    }
    Ok(Predicate {
        op,
        value: raw.clone(),
        raw,
    })
}

/// Split `field op value`; the field is a run of word characters.
fn split_condition(condition: &str) -> Option<(&str, Operator, &str)> {
    let field_end = condition
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(condition.len());
    if field_end == 0 {
        return None;
    }
    let (field, rest) = condition.split_at(field_end);
    let rest = rest.trim_start();
    let (symbol, op) = OPERATORS
        .iter()
        .find(|(symbol, _)| rest.starts_with(symbol))?;
    let value = rest[symbol.len()..].trim();
    if value.is_empty() {
        return None;
    }
    Some((field, *op, value))
}

fn age_from(value: &str) -> Result<TimeDelta, String> {
    let unit = value
        .chars()
        .last()
        .ok_or_else(|| format!("invalid age format '{value}', expected format like '7d', '1w', '1m', '1y'"))?;
    let number = &value[..value.len() - unit.len_utf8()];
    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid number in age '{value}'"))?;
    if !amount.is_finite() {
        return Err(format!("invalid number in age '{value}'"));
    }
    if amount < 0.0 {
        return Err(format!("age cannot be negative: {value}"));
    }
    let hours = match unit.to_ascii_lowercase() {
        'd' => 24.0,
        'w' => 7.0 * 24.0,
        'm' => 30.0 * 24.0,
        'y' => 365.0 * 24.0,
        other => {
            return Err(format!(
                "invalid age unit '{other}', supported units: d (days), w (weeks), m (months), y (years)"
            ));
        }
    };
    let millis = (amount * hours * 3_600_000.0).round();
    TimeDelta::try_milliseconds(millis as i64).ok_or_else(|| format!("age '{value}' is too large"))
}

fn size_from(value: &str) -> Result<u64, String> {
    let value = value.trim().to_uppercase();
    if let Ok(bytes) = value.parse::<i64>() {
        return u64::try_from(bytes).map_err(|_| format!("size cannot be negative: {value}"));
    }

    let split = value
        .rfind(|c: char| c.is_ascii_digit() || c == '.')
        .ok_or_else(|| format!("invalid size format '{value}', no number found"))?;
    let (number, unit) = value.split_at(split + 1);
    let amount: f64 = number
        .parse()
        .map_err(|_| format!("invalid number in size '{value}'"))?;
    if !amount.is_finite() {
        return Err(format!("invalid number in size '{value}'"));
    }
    if amount < 0.0 {
        return Err(format!("size cannot be negative: {value}"));
    }
    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => {
            return Err(format!(
                "invalid size unit '{other}', supported units: B, KB, MB, GB, TB"
            ));
        }
    };
    Ok((amount * multiplier as f64) as u64)
}

/// Parse an age such as `7d` or `1.5w`.
pub fn parse_age(value: &str) -> SweepResult<TimeDelta> {
    age_from(value.trim()).map_err(|reason| SweepError::invalid("age", reason))
}

/// Parse a size such as `100MB` or a bare byte count.
pub fn parse_size(value: &str) -> SweepResult<u64> {
    size_from(value).map_err(|reason| SweepError::invalid("size", reason))
}
