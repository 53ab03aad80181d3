//! Retry policy for provider calls.
//!
//! Exponential backoff without jitter: the delay before retry `n` is
//! `min(base_delay * backoff_factor^n, max_delay)`.

use crate::services::api::ApiError;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Delay to sleep after failed attempt `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let cap = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= cap {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Retryable,
    NonRetryable,
}

pub fn classify(error: &ApiError) -> ErrorClassification {
    if error.is_retryable() {
        ErrorClassification::Retryable
    } else {
        ErrorClassification::NonRetryable
    }
}
