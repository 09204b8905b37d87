//! Front-end facing operations on the user's current chain.
//!
//! [`WalletService`] bundles the stores and engines and returns typed,
//! serialisable payloads; rendering is left to the front-end. Failures are
//! [`WalletError`]s, which convert into JSON error responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::balance::{BalanceAggregator, BalanceReport};
use crate::chain::{ChainDescriptor, ChainId, ChainRegistry};
use crate::conversation::{Conversations, Prompt, PromptKind, parse_send_details};
use crate::error::WalletError;
use crate::tokens::{TokenRecord, TokenRegistry};
use crate::transfer::{TransactionEngine, TransferEvent, TransferRequest, TransferStatus};
use crate::wallet::WalletStore;

/// Public view of a configured chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    /// Numeric chain id.
    pub chain_id: ChainId,
    /// CAIP-2 identifier.
    pub caip2: String,
    /// Human-readable name.
    pub name: String,
    /// Native asset symbol.
    pub symbol: String,
    /// Display icon, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl From<&ChainDescriptor> for ChainSummary {
    fn from(chain: &ChainDescriptor) -> Self {
        Self {
            chain_id: chain.chain_id,
            caip2: chain.caip2(),
            name: chain.name().to_owned(),
            symbol: chain.symbol().to_owned(),
            icon: chain.inner.icon.clone(),
        }
    }
}

/// Returned once, when a wallet is created.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedWallet {
    /// Wallet address, valid on every chain.
    pub address: Address,
    /// Recovery phrase; never returned again.
    pub recovery_phrase: String,
    /// Chain the new session starts on.
    pub chain: ChainSummary,
}

/// Address and current chain, for receiving funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    /// Wallet address.
    pub address: Address,
    /// Current session chain.
    pub chain: ChainSummary,
    /// Explorer page of the address on the current chain.
    pub explorer_url: String,
}

/// Registered tokens on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenList {
    /// Chain the list belongs to.
    pub chain_id: ChainId,
    /// Tokens in registration order.
    pub tokens: Vec<TokenRecord>,
}

/// Status of a transfer tracked by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedStatus {
    /// Waiting for inclusion.
    Pending,
    /// Included and successful.
    Confirmed,
    /// Included and reverted.
    Failed,
    /// Broadcast, but the outcome could not be observed.
    Unknown,
}

impl From<TransferStatus> for TrackedStatus {
    fn from(status: TransferStatus) -> Self {
        match status {
            TransferStatus::Confirmed => Self::Confirmed,
            TransferStatus::Failed => Self::Failed,
        }
    }
}

/// Last known state of a broadcast transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedTransfer {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Chain it was sent on.
    pub chain_id: ChainId,
    /// Last known status.
    pub status: TrackedStatus,
    /// Including block, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Explorer page of the transaction.
    pub explorer_url: String,
}

/// What a free-text input resolved to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InputOutcome {
    /// The input registered a token.
    TokenRegistered(TokenRecord),
    /// The input started a transfer.
    TransferSubmitted(TrackedTransfer),
}

/// Settled transfers stay queryable for this long.
pub const TRANSFER_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Tracked transfers; settled entries are dropped after [`TRANSFER_RETENTION`].
#[derive(Debug, Default)]
struct TransferTable {
    entries: HashMap<TxHash, (TrackedTransfer, Option<Instant>)>,
}

impl TransferTable {
    fn insert(&mut self, transfer: TrackedTransfer) {
        self.expire();
        self.entries.insert(transfer.tx_hash, (transfer, None));
    }

    fn settle(&mut self, tx_hash: TxHash, status: TrackedStatus, block_number: Option<u64>) {
        if let Some((entry, settled_at)) = self.entries.get_mut(&tx_hash) {
            entry.status = status;
            entry.block_number = block_number;
            *settled_at = Some(Instant::now());
        }
    }

    fn get(&self, tx_hash: &TxHash) -> Option<TrackedTransfer> {
        self.entries
            .get(tx_hash)
            .filter(|(_, settled_at)| !Self::expired(*settled_at))
            .map(|(entry, _)| entry.clone())
    }

    fn expire(&mut self) {
        self.entries
            .retain(|_, (_, settled_at)| !Self::expired(*settled_at));
    }

    fn expired(settled_at: Option<Instant>) -> bool {
        settled_at.is_some_and(|at| at.elapsed() >= TRANSFER_RETENTION)
    }
}

/// The wallet engine as seen by a chat or HTTP front-end.
#[derive(Debug)]
pub struct WalletService {
    registry: Arc<ChainRegistry>,
    wallets: Arc<WalletStore>,
    tokens: Arc<TokenRegistry>,
    balances: BalanceAggregator,
    engine: TransactionEngine,
    conversations: Conversations,
    transfers: Arc<RwLock<TransferTable>>,
}

impl WalletService {
    /// Assemble the service from its components.
    #[must_use]
    pub fn new(
        registry: Arc<ChainRegistry>,
        wallets: Arc<WalletStore>,
        tokens: Arc<TokenRegistry>,
        balances: BalanceAggregator,
        engine: TransactionEngine,
        conversations: Conversations,
    ) -> Self {
        Self {
            registry,
            wallets,
            tokens,
            balances,
            engine,
            conversations,
            transfers: Arc::default(),
        }
    }

    /// Every configured chain, in configuration order.
    #[must_use]
    pub fn chains(&self) -> Vec<ChainSummary> {
        self.registry.iter().map(ChainSummary::from).collect()
    }

    /// Create the user's wallet.
    ///
    /// # Errors
    ///
    /// [`WalletError::AlreadyExists`] if the user has one.
    pub async fn create_wallet(&self, user_id: &str) -> Result<CreatedWallet, WalletError> {
        let wallet = self.wallets.create_wallet(user_id).await?;
        let chain = self.chain(self.wallets.home_chain())?;
        Ok(CreatedWallet {
            address: wallet.address,
            recovery_phrase: wallet.recovery_phrase().to_owned(),
            chain: chain.into(),
        })
    }

    /// Address and current chain of the user's wallet.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotFound`] if the user has no wallet.
    pub fn wallet_info(&self, user_id: &str) -> Result<WalletInfo, WalletError> {
        let address = self.require_wallet(user_id)?;
        let chain = self.current_chain(user_id)?;
        Ok(WalletInfo {
            address,
            explorer_url: chain.address_url(address),
            chain: chain.into(),
        })
    }

    /// Balance report on the current chain.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotFound`] if the user has no wallet, or the native
    /// balance read failure.
    pub async fn get_report(&self, user_id: &str) -> Result<BalanceReport, WalletError> {
        let chain_id = self.wallets.get_session(user_id).current_chain;
        self.balances.report(user_id, chain_id).await
    }

    /// Make `chain_id` the user's current chain.
    ///
    /// # Errors
    ///
    /// [`WalletError::UnknownChain`] if the chain is not configured, or
    /// [`WalletError::NotFound`] if the user has no wallet.
    pub async fn switch_chain(
        &self,
        user_id: &str,
        chain_id: ChainId,
    ) -> Result<ChainSummary, WalletError> {
        self.wallets.switch_chain(user_id, chain_id).await?;
        self.chain(chain_id).map(ChainSummary::from)
    }

    /// Register a token on the current chain.
    ///
    /// # Errors
    ///
    /// See [`TokenRegistry::register_token`]; also [`WalletError::NotFound`]
    /// if the user has no wallet.
    pub async fn register_token(
        &self,
        user_id: &str,
        contract_address: &str,
    ) -> Result<TokenRecord, WalletError> {
        let chain_id = self.wallets.get_session(user_id).current_chain;
        self.register_token_on(user_id, chain_id, contract_address).await
    }

    /// Registered tokens on the current chain.
    #[must_use]
    pub fn list_tokens(&self, user_id: &str) -> TokenList {
        let chain_id = self.wallets.get_session(user_id).current_chain;
        TokenList {
            chain_id,
            tokens: self.tokens.list_tokens(user_id, chain_id),
        }
    }

    /// Send native asset on the current chain.
    ///
    /// Returns as soon as the transfer is pending; confirmation is tracked in
    /// the background and visible through [`transfer_status`](Self::transfer_status).
    ///
    /// # Errors
    ///
    /// The abort reason if the transfer was never broadcast.
    pub async fn send_transfer(
        &self,
        user_id: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<TrackedTransfer, WalletError> {
        let chain_id = self.wallets.get_session(user_id).current_chain;
        self.send_on(user_id, chain_id, recipient, amount).await
    }

    /// Last known state of a transfer sent through this process.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotFound`] for unknown hashes and for transfers settled
    /// more than [`TRANSFER_RETENTION`] ago.
    pub fn transfer_status(&self, tx_hash: TxHash) -> Result<TrackedTransfer, WalletError> {
        self.transfers
            .read()
            .get(&tx_hash)
            .ok_or_else(|| WalletError::not_found(format!("transfer {tx_hash}")))
    }

    /// Ask the user for follow-up input on the current chain.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotFound`] if the user has no wallet.
    pub fn open_prompt(&self, user_id: &str, kind: PromptKind) -> Result<Prompt, WalletError> {
        self.require_wallet(user_id)?;
        let prompt = kind.on(self.wallets.get_session(user_id).current_chain);
        self.conversations.open(user_id, prompt);
        Ok(prompt)
    }

    /// Withdraw the user's pending prompt. Returns whether one was pending.
    pub fn cancel_prompt(&self, user_id: &str) -> bool {
        let cancelled = self.conversations.cancel(user_id);
        debug!(user_id, cancelled, "prompt cancelled");
        cancelled
    }

    /// Answer the user's pending prompt.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidInput`] if no prompt is pending or the input is
    /// malformed, otherwise the error of the prompted operation.
    #[instrument(skip(self, input))]
    pub async fn submit_input(&self, user_id: &str, input: &str) -> Result<InputOutcome, WalletError> {
        let prompt = self
            .conversations
            .take(user_id)
            .ok_or_else(|| WalletError::invalid("no prompt is waiting for input"))?;
        debug!(?prompt, "answering prompt");

        match prompt {
            Prompt::AwaitingTokenAddress { chain_id } => self
                .register_token_on(user_id, chain_id, input.trim())
                .await
                .map(InputOutcome::TokenRegistered),
            Prompt::AwaitingSendDetails { chain_id } => {
                let (recipient, amount) = parse_send_details(input)?;
                self.send_on(user_id, chain_id, recipient, amount)
                    .await
                    .map(InputOutcome::TransferSubmitted)
            }
        }
    }

    /// Wait for every tracked transfer to reach a terminal state.
    pub async fn drain(&self) {
        self.engine.drain().await;
    }

    async fn register_token_on(
        &self,
        user_id: &str,
        chain_id: ChainId,
        contract_address: &str,
    ) -> Result<TokenRecord, WalletError> {
        self.require_wallet(user_id)?;
        self.tokens
            .register_token(user_id, chain_id, contract_address)
            .await
    }

    async fn send_on(
        &self,
        user_id: &str,
        chain_id: ChainId,
        recipient: &str,
        amount: &str,
    ) -> Result<TrackedTransfer, WalletError> {
        let chain = self.chain(chain_id)?;
        let mut events = self.engine.send(TransferRequest {
            user_id: user_id.to_owned(),
            chain_id,
            recipient: recipient.to_owned(),
            amount: amount.to_owned(),
        });

        while let Some(event) = events.next().await {
            let tx_hash = match event {
                TransferEvent::Stage(_) => continue,
                TransferEvent::Aborted(err) => return Err(err),
                TransferEvent::Pending { tx_hash }
                | TransferEvent::Confirmed { tx_hash, .. }
                | TransferEvent::Failed { tx_hash } => tx_hash,
            };

            let tracked = TrackedTransfer {
                tx_hash,
                chain_id,
                status: TrackedStatus::Pending,
                block_number: None,
                explorer_url: chain.tx_url(tx_hash),
            };
            self.transfers.write().insert(tracked.clone());

            let transfers = Arc::clone(&self.transfers);
            self.engine.spawn_tracked(async move {
                let (status, block_number) = match events.finish().await {
                    Ok(outcome) => (outcome.status.into(), outcome.block_number),
                    Err(_) => (TrackedStatus::Unknown, None),
                };
                transfers.write().settle(tx_hash, status, block_number);
                info!(%tx_hash, ?status, "transfer settled");
            });
            return Ok(tracked);
        }
        Err(WalletError::Interrupted)
    }

    fn require_wallet(&self, user_id: &str) -> Result<Address, WalletError> {
        self.wallets
            .address_of(user_id)
            .ok_or_else(|| WalletError::not_found(format!("no wallet for user {user_id}")))
    }

    fn chain(&self, chain_id: ChainId) -> Result<&ChainDescriptor, WalletError> {
        self.registry
            .describe(chain_id)
            .ok_or(WalletError::UnknownChain(chain_id))
    }

    fn current_chain(&self, user_id: &str) -> Result<&ChainDescriptor, WalletError> {
        self.chain(self.wallets.get_session(user_id).current_chain)
    }
}

impl WalletError {
    /// HTTP status for this outcome kind.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::UnknownChain(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) | Self::DuplicateToken(_) => StatusCode::CONFLICT,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::ContractCall(_) | Self::InsufficientFunds { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Rpc(_)
            | Self::EstimationFailed(_)
            | Self::SubmissionFailed(_)
            | Self::ConfirmationUnknown { .. } => StatusCode::BAD_GATEWAY,
            Self::Interrupted => StatusCode::SERVICE_UNAVAILABLE,
            Self::Key(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WalletError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        match &self {
            Self::InsufficientFunds {
                cause,
                required,
                available,
            } => {
                body["cause"] = json!(cause);
                body["required"] = json!(required.to_string());
                body["available"] = json!(available.to_string());
            }
            Self::ConfirmationUnknown { tx_hash } => body["tx_hash"] = json!(tx_hash),
            Self::UnknownChain(chain_id) => body["chain_id"] = json!(chain_id),
            _ => {}
        }
        (self.status_code(), Json(body)).into_response()
    }
}
