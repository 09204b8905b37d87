//! Uniform chain capability interface.
//!
//! Every chain the registry knows is reached through a [`ChainClient`]. The
//! engine never sees transport types: implementations classify failures into
//! [`ChainError`] at this boundary.

use std::fmt;

use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChainError;

/// Name and symbol of a token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMeta {
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
}

/// Execution result of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionStatus {
    /// Included and executed successfully.
    Success,
    /// Included but reverted.
    Reverted,
}

/// Receipt summary reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    /// Execution result.
    pub status: InclusionStatus,
    /// Block the transaction was included in, when reported.
    pub block_number: Option<u64>,
}

/// Read/write handle bound to one chain's RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Native balance of `owner` in the smallest unit.
    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;

    /// Token balance of `owner` in the token's smallest unit.
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// Decimals declared by the token contract.
    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// Name and symbol declared by the token contract.
    async fn token_meta(&self, token: Address) -> Result<TokenMeta, ChainError>;

    /// Gas units needed for a plain native transfer.
    async fn estimate_transfer_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<u64, ChainError>;

    /// Node-suggested price per gas unit, in the smallest unit.
    async fn fee_rate(&self) -> Result<u128, ChainError>;

    /// Sign with `signer` and submit a native transfer.
    ///
    /// The signer is consumed and dropped when the call returns.
    async fn broadcast_native_transfer(
        &self,
        signer: PrivateKeySigner,
        to: Address,
        value: U256,
        gas_limit: u64,
        fee_rate: u128,
    ) -> Result<TxHash, ChainError>;

    /// Suspend until the node reports the transaction as included.
    ///
    /// Never returns on its own for a transaction that is never mined; the
    /// caller bounds the wait.
    async fn await_inclusion(&self, tx_hash: TxHash) -> Result<Inclusion, ChainError>;
}
