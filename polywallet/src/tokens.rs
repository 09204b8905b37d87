//! User-registered fungible tokens, per user and chain.

use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::{info, instrument, warn};

use crate::chain::{ChainId, ProviderPool, TokenMeta, parse_address};
use crate::error::{ChainError, WalletError};
use crate::locks::UserLocks;
use crate::store::{DocumentStore, Shared, TokenDocument};
use crate::units::MAX_DECIMALS;

/// Snapshot of a token contract's metadata at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// User who registered the token.
    #[serde(default)]
    pub owner_user_id: String,
    /// Chain the contract lives on.
    #[serde(default)]
    pub chain_id: ChainId,
    /// Contract address.
    #[serde(rename = "address")]
    pub contract_address: Address,
    /// Token name reported by the contract.
    pub name: String,
    /// Token symbol reported by the contract.
    pub symbol: String,
    /// Decimals reported by the contract; never re-read.
    #[serde(deserialize_with = "number_or_string")]
    pub decimals: u8,
    /// Registration time.
    pub added_at: DateTime<Utc>,
}

/// Older files store decimals as a string.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimals {
        Number(u8),
        Text(String),
    }

    match Decimals::deserialize(deserializer)? {
        Decimals::Number(decimals) => Ok(decimals),
        Decimals::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

/// Both reads failing keeps the first error's kind; a partial answer is a
/// contract that does not conform.
fn token_metadata(
    meta: Result<TokenMeta, ChainError>,
    decimals: Result<u8, ChainError>,
) -> Result<(TokenMeta, u8), ChainError> {
    match (meta, decimals) {
        (Ok(meta), Ok(decimals)) => Ok((meta, decimals)),
        (Err(err), Err(_)) => Err(err),
        (Ok(_), Err(err)) | (Err(err), Ok(_)) => Err(ChainError::ContractCall(format!(
            "incomplete token metadata: {err}"
        ))),
    }
}

/// Append-only token lists with contract validation on insert.
#[derive(Debug)]
pub struct TokenRegistry {
    pool: Arc<ProviderPool>,
    store: Arc<dyn DocumentStore>,
    doc: Shared<TokenDocument>,
    locks: UserLocks,
}

impl TokenRegistry {
    /// Load the token document from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Storage`] if the document cannot be read.
    pub async fn load(
        pool: Arc<ProviderPool>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, WalletError> {
        let doc = store.load_tokens().await?;
        info!(users = doc.len(), "token document loaded");
        Ok(Self {
            pool,
            store,
            doc: Shared::new(doc),
            locks: UserLocks::new(),
        })
    }

    /// Validate `contract_address` on `chain_id` and append it to the user's list.
    ///
    /// Name, symbol and decimals are read concurrently and must all succeed;
    /// the duplicate check and the append then run under the user's lock.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidInput`] for a malformed address.
    /// - [`WalletError::UnknownChain`] if the chain is not configured.
    /// - [`WalletError::ContractCall`] if the address is not a conforming
    ///   token, or only some of its metadata reads succeed.
    /// - [`WalletError::Rpc`] if the node could not be reached at all.
    /// - [`WalletError::DuplicateToken`] if the contract is already listed.
    #[instrument(skip(self))]
    pub async fn register_token(
        &self,
        user_id: &str,
        chain_id: ChainId,
        contract_address: &str,
    ) -> Result<TokenRecord, WalletError> {
        let address = parse_address(contract_address)?;
        let client = self.pool.client_for(chain_id).await?;

        let (meta, decimals) =
            tokio::join!(client.token_meta(address), client.token_decimals(address));
        let (meta, decimals) = token_metadata(meta, decimals)
            .inspect_err(|e| warn!(%address, error = %e, "token metadata query failed"))?;
        if decimals > MAX_DECIMALS {
            return Err(ChainError::ContractCall(format!(
                "{address} reports unsupported decimals {decimals}"
            ))
            .into());
        }

        let _user = self.locks.lock(user_id).await;
        if self.contains(user_id, chain_id, address) {
            return Err(WalletError::DuplicateToken(address));
        }

        let record = TokenRecord {
            owner_user_id: user_id.to_owned(),
            chain_id,
            contract_address: address,
            name: meta.name,
            symbol: meta.symbol,
            decimals,
            added_at: Utc::now(),
        };

        let mut draft = self.doc.begin().await;
        draft
            .doc
            .entry(user_id.to_owned())
            .or_default()
            .entry(chain_id)
            .or_default()
            .push(record.clone());
        self.store.save_tokens(&draft.doc).await?;
        draft.install();

        info!(%address, symbol = %record.symbol, "token registered");
        Ok(record)
    }

    /// The user's tokens on `chain_id` in registration order.
    #[must_use]
    pub fn list_tokens(&self, user_id: &str, chain_id: ChainId) -> Vec<TokenRecord> {
        self.doc
            .snapshot()
            .get(user_id)
            .and_then(|chains| chains.get(&chain_id))
            .cloned()
            .unwrap_or_default()
    }

    // Addresses compare as bytes, so checksum casing never matters here.
    fn contains(&self, user_id: &str, chain_id: ChainId, address: Address) -> bool {
        self.doc
            .snapshot()
            .get(user_id)
            .and_then(|chains| chains.get(&chain_id))
            .is_some_and(|tokens| tokens.iter().any(|t| t.contract_address == address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, USDC, pool_with};
    use crate::store::MemoryStore;

    async fn registry_with(chain: &Arc<MockChain>) -> (TokenRegistry, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let tokens = TokenRegistry::load(pool_with(chain), Arc::clone(&memory) as _)
            .await
            .unwrap();
        (tokens, memory)
    }

    #[tokio::test]
    async fn registers_and_lists_in_order() {
        let chain = MockChain::new();
        chain.add_token(USDC, "USD Coin", "USDC", 6);
        let other = Address::repeat_byte(0x42);
        chain.add_token(other, "Other", "OTH", 18);
        let (tokens, memory) = registry_with(&chain).await;

        tokens.register_token("alice", 1, &USDC.to_string()).await.unwrap();
        let record = tokens.register_token("alice", 1, &other.to_string()).await.unwrap();
        assert_eq!(record.symbol, "OTH");
        assert_eq!(record.decimals, 18);

        let listed: Vec<_> = tokens.list_tokens("alice", 1).into_iter().map(|t| t.symbol).collect();
        assert_eq!(listed, ["USDC", "OTH"]);
        assert!(tokens.list_tokens("alice", 137).is_empty());
        assert_eq!(memory.load_tokens().await.unwrap()["alice"][&1].len(), 2);
    }

    #[tokio::test]
    async fn duplicate_is_rejected_case_insensitively() {
        let chain = MockChain::new();
        chain.add_token(USDC, "USD Coin", "USDC", 6);
        let (tokens, _) = registry_with(&chain).await;

        let checksummed = USDC.to_checksum(None);
        tokens.register_token("alice", 1, &checksummed).await.unwrap();

        let lower = checksummed.to_lowercase();
        let err = tokens.register_token("alice", 1, &lower).await.unwrap_err();
        assert!(matches!(err, WalletError::DuplicateToken(a) if a == USDC));
        assert_eq!(tokens.list_tokens("alice", 1).len(), 1);

        // other users and chains have their own lists
        tokens.register_token("bob", 1, &lower).await.unwrap();
    }

    #[tokio::test]
    async fn non_token_contract_is_rejected() {
        let chain = MockChain::new();
        let (tokens, memory) = registry_with(&chain).await;

        let err = tokens
            .register_token("alice", 1, "0x000000000000000000000000000000000000dead")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "contract_call_error");
        assert!(tokens.list_tokens("alice", 1).is_empty());
        assert!(memory.load_tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_duplicates_register_once() {
        let chain = MockChain::new();
        chain.add_token(USDC, "USD Coin", "USDC", 6);
        let (tokens, memory) = registry_with(&chain).await;
        let tokens = Arc::new(tokens);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                tokio::spawn(async move {
                    tokens.register_token("alice", 1, &USDC.to_string()).await
                })
            })
            .collect();
        let mut registered = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => registered += 1,
                Err(err) => assert!(matches!(err, WalletError::DuplicateToken(_))),
            }
        }

        assert_eq!(registered, 1);
        assert_eq!(tokens.list_tokens("alice", 1).len(), 1);
        assert_eq!(memory.load_tokens().await.unwrap()["alice"][&1].len(), 1);
    }

    #[tokio::test]
    async fn partial_metadata_failure_is_a_contract_error() {
        let chain = MockChain::new();
        chain.add_token(USDC, "USD Coin", "USDC", 6);
        chain.fail_decimals(USDC, ChainError::Rpc("connection reset".into()));
        let (tokens, memory) = registry_with(&chain).await;

        let err = tokens
            .register_token("alice", 1, &USDC.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "contract_call_error");
        assert!(tokens.list_tokens("alice", 1).is_empty());
        assert!(memory.load_tokens().await.unwrap().is_empty());
    }

    #[test]
    fn unreachable_node_stays_an_rpc_error() {
        let rpc = || ChainError::Rpc("connection refused".into());
        let err = token_metadata(Err(rpc()), Err(rpc())).unwrap_err();
        assert!(matches!(err, ChainError::Rpc(_)));
    }

    #[test]
    fn decimals_accept_numbers_and_numeric_strings() {
        let record = |decimals: serde_json::Value| {
            serde_json::from_value::<TokenRecord>(serde_json::json!({
                "address": USDC,
                "name": "USD Coin",
                "symbol": "USDC",
                "decimals": decimals,
                "addedAt": "2024-03-02T10:00:00Z",
            }))
        };
        assert_eq!(record(serde_json::json!(6)).unwrap().decimals, 6);
        assert_eq!(record(serde_json::json!("18")).unwrap().decimals, 18);
        assert!(record(serde_json::json!("six")).is_err());
    }

    #[tokio::test]
    async fn malformed_address_and_unknown_chain() {
        let chain = MockChain::new();
        let (tokens, _) = registry_with(&chain).await;

        let err = tokens.register_token("alice", 1, "0x1234").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        let err = tokens
            .register_token("alice", 999, &USDC.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnknownChain(999)));
    }
}
