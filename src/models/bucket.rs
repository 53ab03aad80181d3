//! A bucket paired with the region it lives in.

use serde::{Deserialize, Serialize};

/// Region reported for buckets whose location constraint is empty.
pub const DEFAULT_REGION: &str = "us-east-1";

/// A bucket name resolved to its hosting region.
///
/// Produced by region resolution and consumed by the collector to pick the
/// regional client that lists the bucket's uploads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketRef {
    /// Globally unique bucket name.
    pub name: String,

    /// Region hosting the bucket (e.g. "eu-west-1").
    pub region: String,
}

impl BucketRef {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }

    /// Build from a raw location constraint, mapping an absent or empty
    /// constraint to [`DEFAULT_REGION`].
    pub fn from_location(name: impl Into<String>, location: Option<&str>) -> Self {
        let region = match location.map(str::trim) {
            Some(region) if !region.is_empty() => region,
            _ => DEFAULT_REGION,
        };
        Self::new(name, region)
    }
}
