//! One retrying client per region, created lazily and shared.

use crate::errors::SweepResult;
use crate::services::client::RetryingClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Builds a client bound to a region.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, region: &str) -> SweepResult<Arc<RetryingClient>>;
}

pub struct RegionalClientRegistry {
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<String, Arc<RetryingClient>>>,
}

impl RegionalClientRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Return the client for `region`, building it on first use.
    ///
    /// Concurrent first requests for the same region build exactly one
    /// client. A failed build is not cached.
    pub async fn client_for(&self, region: &str) -> SweepResult<Arc<RetryingClient>> {
        if let Some(client) = self.clients.read().await.get(region) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(region) {
            return Ok(Arc::clone(client));
        }

        let client = self.factory.create(region).await?;
        debug!(
            region,
            rate_limit = client.rate_limit(),
            max_retries = client.retry_config().max_retries,
            "created regional client"
        );
        clients.insert(region.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SweepError;
    use crate::services::testing::{FakeApi, FakeFactory};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_first_use_builds_one_client() {
        let factory = Arc::new(
            FakeFactory::new(Arc::new(FakeApi::new())).with_delay(Duration::from_millis(20)),
        );
        let registry = Arc::new(RegionalClientRegistry::new(factory.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.client_for("eu-west-1").await });
        }
        let mut clients = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            clients.push(joined.unwrap().unwrap());
        }

        assert_eq!(factory.created(), vec!["eu-west-1".to_string()]);
        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn failed_build_is_retried_on_next_use() {
        let factory = Arc::new(FakeFactory::new(Arc::new(FakeApi::new())).failing_first(1));
        let registry = RegionalClientRegistry::new(factory.clone());

        let err = registry.client_for("ap-south-1").await.err().unwrap();
        assert!(matches!(err, SweepError::ClientInit { .. }));
        assert!(registry.is_empty().await);

        registry.client_for("ap-south-1").await.unwrap();
        assert_eq!(registry.len().await, 1);
    }
}
