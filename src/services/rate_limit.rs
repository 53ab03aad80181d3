//! Token-bucket limiter shared by every call a client issues.

use crate::errors::{SweepError, SweepResult};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RATE_LIMIT: f64 = 10.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Allows `rate` calls per second on average with bursts of the same size.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Non-positive or non-finite rates fall back to [`DEFAULT_RATE_LIMIT`].
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            DEFAULT_RATE_LIMIT
        };
        let burst = rate.floor().max(1.0);
        Self {
            rate,
            burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Take a token now, or report how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Wait for a token. Returns [`SweepError::Cancelled`] as soon as `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> SweepResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SweepError::Cancelled),
                        _ = sleep(wait) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_free_then_calls_are_paced() {
        let limiter = RateLimiter::new(10.0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(99));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_stops_on_cancel() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(SweepError::Cancelled)));
    }

    #[test]
    fn invalid_rate_falls_back_to_default() {
        assert_eq!(RateLimiter::new(0.0).rate(), DEFAULT_RATE_LIMIT);
        assert_eq!(RateLimiter::new(f64::NAN).rate(), DEFAULT_RATE_LIMIT);
        assert_eq!(RateLimiter::new(2.5).rate(), 2.5);
    }
}
