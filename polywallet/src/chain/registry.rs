//! Immutable chain id → descriptor lookup.

use std::collections::HashMap;

use super::{ChainDescriptor, ChainId, ChainsConfig};

/// Read-only registry of configured chains.
///
/// Built once at start-up; adding a chain only requires a new config entry.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    order: Vec<ChainId>,
    chains: HashMap<ChainId, ChainDescriptor>,
}

impl ChainRegistry {
    /// Build the registry from parsed chain configuration.
    #[must_use]
    pub fn new(config: &ChainsConfig) -> Self {
        let order = config.iter().map(|c| c.chain_id).collect();
        let chains = config
            .iter()
            .map(|c| (c.chain_id, c.clone()))
            .collect();
        Self { order, chains }
    }

    /// Look up a chain by id.
    #[must_use]
    pub fn describe(&self, chain_id: ChainId) -> Option<&ChainDescriptor> {
        self.chains.get(&chain_id)
    }

    /// Whether the chain id resolves.
    #[must_use]
    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// All chains in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.order.iter().filter_map(|id| self.chains.get(id))
    }

    /// Number of configured chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no chain is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
