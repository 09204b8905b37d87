//! Lazily constructed, shared chain clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::client::ChainClient;
use super::evm::EvmClient;
use super::{ChainDescriptor, ChainId, ChainRegistry};
use crate::error::{ChainError, WalletError};

/// Factory for chain clients.
///
/// The pool calls it at most once per chain id.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Construct a client bound to `chain`'s RPC endpoint.
    async fn connect(&self, chain: &ChainDescriptor) -> Result<Arc<dyn ChainClient>, ChainError>;
}

/// Connector producing [`EvmClient`]s over HTTP.
#[derive(Debug, Clone, Copy)]
pub struct EvmConnector {
    poll_interval: Duration,
}

impl EvmConnector {
    /// Create a connector whose clients poll receipts at `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl ClientConnector for EvmConnector {
    async fn connect(&self, chain: &ChainDescriptor) -> Result<Arc<dyn ChainClient>, ChainError> {
        let client = EvmClient::connect(chain, self.poll_interval)?;
        Ok(Arc::new(client))
    }
}

/// One cached client per chain id, shared by all users.
///
/// Slots are created up front for every registry entry, so lookups need no
/// outer lock and concurrent first access to a chain constructs its client
/// exactly once.
pub struct ProviderPool {
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn ClientConnector>,
    slots: HashMap<ChainId, OnceCell<Arc<dyn ChainClient>>>,
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPool")
            .field("chains", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ProviderPool {
    /// Create a pool over every chain in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ChainRegistry>, connector: Arc<dyn ClientConnector>) -> Self {
        let slots = registry
            .iter()
            .map(|chain| (chain.chain_id, OnceCell::new()))
            .collect();
        Self {
            registry,
            connector,
            slots,
        }
    }

    /// Return the cached client for `chain_id`, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnknownChain`] for ids not in the registry and
    /// [`WalletError::Rpc`] if the client cannot be constructed.
    pub async fn client_for(&self, chain_id: ChainId) -> Result<Arc<dyn ChainClient>, WalletError> {
        let (Some(slot), Some(chain)) = (self.slots.get(&chain_id), self.registry.describe(chain_id))
        else {
            return Err(WalletError::UnknownChain(chain_id));
        };

        let client = slot
            .get_or_try_init(|| async {
                debug!(chain_id, "constructing chain client");
                self.connector.connect(chain).await
            })
            .await?;
        Ok(Arc::clone(client))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{CountingConnector, MockChain, registry};

    #[tokio::test]
    async fn concurrent_first_access_constructs_once() {
        let connector = Arc::new(CountingConnector::new(MockChain::new()));
        let pool = Arc::new(ProviderPool::new(
            Arc::new(registry()),
            Arc::clone(&connector) as Arc<dyn ClientConnector>,
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.client_for(1).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.constructed.load(Ordering::SeqCst), 1);

        pool.client_for(137).await.unwrap();
        assert_eq!(connector.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        let connector = Arc::new(CountingConnector::new(MockChain::new()));
        let pool = ProviderPool::new(Arc::new(registry()), connector);
        let err = pool.client_for(999).await.unwrap_err();
        assert!(matches!(err, WalletError::UnknownChain(999)));
    }
}
