//! Bounded fan-out over a batch of work items.

use crate::errors::{SweepError, SweepResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Runs at most `concurrency` work futures at a time.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `work` for every item and collect the outcomes in completion order.
    ///
    /// Once `cancel` fires no further items are started; items already running
    /// finish (or observe the token themselves) and their outcomes are kept.
    /// A panicking worker yields [`SweepError::Worker`].
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        work: F,
    ) -> Vec<SweepResult<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = SweepResult<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let job = work(item);
            tasks.spawn(async move {
                let _permit = permit;
                job.await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.unwrap_or_else(|err| Err(SweepError::Worker(err.to_string()))));
        }
        outcomes
    }
}
