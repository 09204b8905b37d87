//! Unified error types for the wallet service.
//!
//! - [`Error`]: start-up and process-level failures (config, storage, server).
//! - [`ChainError`]: failures at the provider boundary, already classified
//!   so callers can decide between abort and continue.
//! - [`WalletError`]: the outcome taxonomy surfaced to the front-end.
//! - [`StorageError`]: document persistence failures.

use alloy_primitives::{Address, TxHash, U256};
use serde::Serialize;
use thiserror::Error;

use crate::chain::ChainId;

/// Top-level error type for the wallet application.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be resolved, read, parsed or validated.
    #[error("config: {0}")]
    Config(String),

    /// Wallet or token documents could not be loaded.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Components could not be assembled from the loaded documents.
    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    /// Server bind or runtime error.
    #[error("server: {0}")]
    Server(String),
}

impl Error {
    /// Create a config error from a message.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a config error from a message and an underlying cause.
    #[inline]
    pub fn config_with(msg: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Config(format!("{}: {err}", msg.into()))
    }

    /// Create a server error from a message and an underlying cause.
    #[inline]
    pub fn server_with(msg: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Server(format!("{}: {err}", msg.into()))
    }
}

/// Failure of a single chain read or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Transport or node failure; transient, safe to retry by the caller.
    #[error("rpc: {0}")]
    Rpc(String),

    /// The target is not a conforming token contract, or the read reverted.
    #[error("contract call: {0}")]
    ContractCall(String),

    /// The node rejected a broadcast (nonce conflict, underpriced, ...).
    #[error("submission rejected: {0}")]
    Submission(String),
}

/// Which part of a transfer could not be covered by the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallCause {
    /// The balance does not cover the transfer amount itself.
    Amount,
    /// The amount is covered, but not the amount plus network fees.
    Fees,
}

/// Operation failures surfaced to the front-end.
///
/// Every variant maps to one distinguishable outcome kind, see [`kind`](Self::kind).
#[derive(Debug, Error)]
pub enum WalletError {
    /// Unknown user, wallet or transfer.
    #[error("not found: {0}")]
    NotFound(String),

    /// The chain id does not resolve in the registry.
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),

    /// The user already owns a wallet.
    #[error("wallet already exists for user {0}")]
    AlreadyExists(String),

    /// The token is already registered for this user and chain.
    #[error("token {0} is already registered")]
    DuplicateToken(Address),

    /// Malformed address, amount or free-text input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Target is not a conforming token contract, or a read reverted.
    #[error("contract call failed: {0}")]
    ContractCall(String),

    /// Transport or node failure.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// The balance does not cover the transfer.
    #[error("insufficient funds ({cause:?}): required {required}, available {available}")]
    InsufficientFunds {
        /// Which figure was not covered.
        cause: ShortfallCause,
        /// Smallest-unit amount that was needed.
        required: U256,
        /// Smallest-unit balance at check time.
        available: U256,
    },

    /// Gas or fee estimation failed before anything was broadcast.
    #[error("estimation failed: {0}")]
    EstimationFailed(String),

    /// The node rejected the broadcast.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// Broadcast succeeded but the outcome could not be observed.
    #[error("confirmation unknown for {tx_hash}")]
    ConfirmationUnknown {
        /// Hash of the broadcast transaction.
        tx_hash: TxHash,
    },

    /// The process began shutting down before the transfer was broadcast.
    #[error("interrupted before broadcast")]
    Interrupted,

    /// Key generation or signer reconstruction failed.
    #[error("key material: {0}")]
    Key(String),

    /// Persisting a document failed; in-memory state is unchanged.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl WalletError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid input error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable machine-readable code for the outcome kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::UnknownChain(_) => "unknown_chain",
            Self::AlreadyExists(_) => "already_exists",
            Self::DuplicateToken(_) => "duplicate_token",
            Self::InvalidInput(_) => "invalid_input",
            Self::ContractCall(_) => "contract_call_error",
            Self::Rpc(_) => "rpc_error",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::EstimationFailed(_) => "estimation_failed",
            Self::SubmissionFailed(_) => "submission_failed",
            Self::ConfirmationUnknown { .. } => "confirmation_unknown",
            Self::Interrupted => "interrupted",
            Self::Key(_) => "key_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<ChainError> for WalletError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Rpc(msg) => Self::Rpc(msg),
            ChainError::ContractCall(msg) => Self::ContractCall(msg),
            ChainError::Submission(msg) => Self::SubmissionFailed(msg),
        }
    }
}

/// Error type for document persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
