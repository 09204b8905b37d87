//! Combined native and token balance reports.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use futures::future::join_all;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::chain::{ChainId, ChainRegistry, ProviderPool};
use crate::error::WalletError;
use crate::tokens::{TokenRecord, TokenRegistry};
use crate::units::format_amount;
use crate::wallet::WalletStore;

/// One non-zero token holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    /// Token contract.
    pub contract_address: Address,
    /// Token symbol.
    pub symbol: String,
    /// Balance rendered with six fractional digits and the symbol.
    pub formatted: String,
}

/// Balance report for one user on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    /// Chain the report was read from.
    pub chain_id: ChainId,
    /// Address the balances belong to.
    pub address: Address,
    /// Native balance rendered with six fractional digits and the symbol.
    pub native: String,
    /// Registered tokens with a positive balance, in registration order.
    pub tokens: Vec<TokenBalance>,
}

/// Builds [`BalanceReport`]s.
#[derive(Debug, Clone)]
pub struct BalanceAggregator {
    registry: Arc<ChainRegistry>,
    pool: Arc<ProviderPool>,
    wallets: Arc<WalletStore>,
    tokens: Arc<TokenRegistry>,
}

impl BalanceAggregator {
    /// Create an aggregator over the shared stores.
    #[must_use]
    pub const fn new(
        registry: Arc<ChainRegistry>,
        pool: Arc<ProviderPool>,
        wallets: Arc<WalletStore>,
        tokens: Arc<TokenRegistry>,
    ) -> Self {
        Self {
            registry,
            pool,
            wallets,
            tokens,
        }
    }

    /// Read the native balance and every registered token balance.
    ///
    /// Token queries run concurrently with the native read. A failing token
    /// is logged and left out; only the native read can fail the report.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotFound`] if the user has no wallet,
    /// [`WalletError::UnknownChain`] for an unconfigured chain, and the
    /// native read's error otherwise.
    #[instrument(skip(self))]
    pub async fn report(&self, user_id: &str, chain_id: ChainId) -> Result<BalanceReport, WalletError> {
        let address = self
            .wallets
            .address_of(user_id)
            .ok_or_else(|| WalletError::not_found(format!("no wallet for user {user_id}")))?;
        let chain = self
            .registry
            .describe(chain_id)
            .ok_or(WalletError::UnknownChain(chain_id))?;
        let client = self.pool.client_for(chain_id).await?;

        let records = self.tokens.list_tokens(user_id, chain_id);
        let token_reads = join_all(records.iter().map(|record| {
            let client = Arc::clone(&client);
            async move {
                let balance = client.token_balance(record.contract_address, address).await;
                (record, balance)
            }
        }));

        let (native, token_results) = tokio::join!(client.native_balance(address), token_reads);
        let native = native?;

        let tokens = token_results
            .into_iter()
            .filter_map(|(record, balance)| match balance {
                Ok(balance) => positive(record, balance),
                Err(error) => {
                    warn!(token = %record.contract_address, %error, "token balance omitted");
                    None
                }
            })
            .collect();

        Ok(BalanceReport {
            chain_id,
            address,
            native: format_amount(native, chain.native_decimals(), chain.symbol()),
            tokens,
        })
    }
}

fn positive(record: &TokenRecord, balance: U256) -> Option<TokenBalance> {
    (!balance.is_zero()).then(|| TokenBalance {
        contract_address: record.contract_address,
        symbol: record.symbol.clone(),
        formatted: format_amount(balance, record.decimals, &record.symbol),
    })
}
