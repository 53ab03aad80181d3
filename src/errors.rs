//! Error taxonomy shared by every sweeper component.
//!
//! Validation, permanent remote failures, exhausted retries, cancellation and
//! a declined confirmation each get their own variant so callers can tell a
//! user decision apart from a system failure. Partial fan-out failures are
//! carried as a [`PartialFailure`] value next to the partial result.

use crate::services::api::ApiError;
use thiserror::Error;

/// How many per-unit errors an aggregate keeps verbatim for diagnostics.
pub const MAX_FAILURE_SAMPLES: usize = 3;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid filter condition '{condition}': {reason}")]
    InvalidFilter { condition: String, reason: String },

    #[error("{operation} failed: {source}")]
    Remote {
        operation: String,
        #[source]
        source: ApiError,
    },

    #[error("{operation} failed after {retries} retries: {source}")]
    RetriesExhausted {
        operation: String,
        retries: u32,
        #[source]
        source: ApiError,
    },

    #[error("failed to create client for region `{region}`: {reason}")]
    ClientInit { region: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deletion cancelled by user")]
    Declined,

    #[error("no uploads match the specified criteria")]
    NothingToDelete,

    #[error("failed to delete {failed} out of {total} uploads")]
    PartialDeletion { failed: usize, total: usize },

    #[error(transparent)]
    Partial(#[from] PartialFailure),

    #[error("failed to read confirmation: {0}")]
    Confirmation(#[from] std::io::Error),

    #[error("failed to export to {path}: {reason}")]
    Export { path: String, reason: String },

    #[error("worker task failed: {0}")]
    Worker(String),
}

pub type SweepResult<T> = Result<T, SweepError>;

impl SweepError {
    /// Shortcut for a validation failure on a named field.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Aggregate of per-unit failures from one fan-out.
///
/// Only the first [`MAX_FAILURE_SAMPLES`] messages are kept; the rest are
/// counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failed} of {total} buckets failed{}", summarize(.samples, *.failed))]
pub struct PartialFailure {
    pub failed: usize,
    pub total: usize,
    pub samples: Vec<String>,
}

impl PartialFailure {
    /// Build an aggregate from the collected errors, or `None` when nothing failed.
    pub fn from_errors(total: usize, errors: &[SweepError]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        Some(Self {
            failed: errors.len(),
            total,
            samples: errors
                .iter()
                .take(MAX_FAILURE_SAMPLES)
                .map(ToString::to_string)
                .collect(),
        })
    }
}

fn summarize(samples: &[String], failed: usize) -> String {
    if samples.is_empty() {
        return String::new();
    }
    let mut out = format!(": {}", samples.join("; "));
    if failed > samples.len() {
        out.push_str(&format!("; ... and {} more", failed - samples.len()));
    }
    out
}
