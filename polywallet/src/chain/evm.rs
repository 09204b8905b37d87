//! EVM chain client built on [`alloy_provider`].
//!
//! Reads go through a shared, filler-free HTTP provider. A broadcast wraps
//! that provider with a wallet filler for the duration of the single call, so
//! the signer never outlives it.

use std::time::Duration;

use alloy_network::{Ethereum, EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use alloy_transport::TransportError;
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::client::{ChainClient, Inclusion, InclusionStatus, TokenMeta};
use super::{ChainDescriptor, ChainId};
use crate::error::ChainError;

sol! {
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Classify a transport error from a read call.
///
/// A JSON-RPC error payload means the node answered (e.g. execution
/// reverted); anything else is a transport failure.
fn read_error(err: &TransportError) -> ChainError {
    if err.as_error_resp().is_some() {
        ChainError::ContractCall(err.to_string())
    } else {
        ChainError::Rpc(err.to_string())
    }
}

/// Classify a transport error from a broadcast.
fn submit_error(err: &TransportError) -> ChainError {
    if err.as_error_resp().is_some() {
        ChainError::Submission(err.to_string())
    } else {
        ChainError::Rpc(err.to_string())
    }
}

/// [`ChainClient`] for EIP-155 chains.
#[derive(Debug, Clone)]
pub struct EvmClient {
    chain_id: ChainId,
    provider: DynProvider<Ethereum>,
    poll_interval: Duration,
}

impl EvmClient {
    /// Connect to the descriptor's RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Rpc`] if the endpoint is not a valid URL.
    pub fn connect(chain: &ChainDescriptor, poll_interval: Duration) -> Result<Self, ChainError> {
        let url = Url::parse(chain.rpc())
            .map_err(|e| ChainError::Rpc(format!("invalid RPC URL for {}: {e}", chain.caip2())))?;
        let provider = RootProvider::<Ethereum>::new_http(url).erased();
        info!(chain_id = chain.chain_id, chain = chain.name(), "EVM client initialized");
        Ok(Self {
            chain_id: chain.chain_id,
            provider,
            poll_interval,
        })
    }

    async fn call<C: SolCall>(&self, token: Address, call: &C) -> Result<C::Return, ChainError> {
        let tx = TransactionRequest::default()
            .with_to(token)
            .with_input(Bytes::from(call.abi_encode()));
        let output = self.provider.call(tx).await.map_err(|e| read_error(&e))?;
        C::abi_decode_returns(&output).map_err(|e| {
            ChainError::ContractCall(format!(
                "{} on {token} returned undecodable data: {e}",
                C::SIGNATURE
            ))
        })
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(owner)
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get balance: {e}")))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.call(token, &IERC20::balanceOfCall { owner }).await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.call(token, &IERC20::decimalsCall {}).await
    }

    async fn token_meta(&self, token: Address) -> Result<TokenMeta, ChainError> {
        let (name, symbol) = tokio::try_join!(
            self.call(token, &IERC20::nameCall {}),
            self.call(token, &IERC20::symbolCall {}),
        )?;
        Ok(TokenMeta { name, symbol })
    }

    async fn estimate_transfer_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<u64, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value);
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| ChainError::Rpc(format!("gas estimation failed: {e}")))
    }

    async fn fee_rate(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to get gas price: {e}")))
    }

    async fn broadcast_native_transfer(
        &self,
        signer: PrivateKeySigner,
        to: Address,
        value: U256,
        gas_limit: u64,
        fee_rate: u128,
    ) -> Result<TxHash, ChainError> {
        let from = signer.address();
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_value(value)
            .with_gas_limit(gas_limit)
            .with_gas_price(fee_rate);

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_provider(self.provider.clone());
        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| submit_error(&e))?;

        let tx_hash = *pending.tx_hash();
        info!(chain_id = self.chain_id, %from, %to, %tx_hash, "native transfer broadcast");
        Ok(tx_hash)
    }

    async fn await_inclusion(&self, tx_hash: TxHash) -> Result<Inclusion, ChainError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| ChainError::Rpc(format!("failed to get receipt: {e}")))?;

            if let Some(receipt) = receipt {
                let status = if ReceiptResponse::status(&receipt) {
                    InclusionStatus::Success
                } else {
                    InclusionStatus::Reverted
                };
                return Ok(Inclusion {
                    status,
                    block_number: ReceiptResponse::block_number(&receipt),
                });
            }

            debug!(chain_id = self.chain_id, %tx_hash, "receipt not yet available");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
