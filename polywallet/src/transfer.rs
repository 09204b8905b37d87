//! Native-asset transfer state machine.
//!
//! A transfer moves through `Validating → Estimating → Affording →
//! Broadcasting → Pending` and ends in exactly one terminal event:
//! `Confirmed`, `Failed` (included but reverted) or `Aborted`. Anything that
//! goes wrong before the broadcast aborts without touching the network's
//! state; after the broadcast the transfer can no longer be abandoned and
//! always runs to a terminal event, even if nobody is listening.
//!
//! Each transfer runs as one task on the engine's [`TaskTracker`] and reports
//! through a [`TransferEvents`] stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::chain::{
    ChainClient, ChainId, ChainRegistry, Inclusion, InclusionStatus, ProviderPool, parse_address,
};
use crate::error::{ChainError, ShortfallCause, WalletError};
use crate::units::parse_amount;
use crate::wallet::WalletStore;

/// Upper bound on events per transfer; sends never wait on the receiver.
const EVENT_CAPACITY: usize = 8;

/// A request to move native asset from the user's wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Sender; must own a wallet.
    pub user_id: String,
    /// Chain to transfer on.
    pub chain_id: ChainId,
    /// Recipient address as entered.
    pub recipient: String,
    /// Human decimal amount in native units, e.g. `"0.05"`.
    pub amount: String,
}

/// Non-terminal progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Checking the recipient and amount.
    Validating,
    /// Reading balance, gas estimate and fee rate.
    Estimating,
    /// Comparing the balance with amount plus fees.
    Affording,
    /// Signing and submitting.
    Broadcasting,
}

/// One step of a transfer as seen by the caller.
#[derive(Debug)]
pub enum TransferEvent {
    /// Entered a pre-broadcast stage.
    Stage(Stage),
    /// Accepted by the node; waiting for inclusion.
    Pending {
        /// Transaction hash.
        tx_hash: TxHash,
    },
    /// Included and executed successfully.
    Confirmed {
        /// Transaction hash.
        tx_hash: TxHash,
        /// Including block, when the node reports it.
        block_number: Option<u64>,
    },
    /// Included but reverted.
    Failed {
        /// Transaction hash.
        tx_hash: TxHash,
    },
    /// Never broadcast, or broadcast with an unknown outcome
    /// ([`WalletError::ConfirmationUnknown`]).
    Aborted(WalletError),
}

/// Final status of an included transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Included and successful.
    Confirmed,
    /// Included and reverted.
    Failed,
}

/// Result of a broadcast transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Inclusion result.
    pub status: TransferStatus,
    /// Including block, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Event stream of one transfer.
///
/// Dropping it before `Broadcasting` abandons the transfer.
#[derive(Debug)]
pub struct TransferEvents {
    rx: mpsc::Receiver<TransferEvent>,
}

impl Stream for TransferEvents {
    type Item = TransferEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl TransferEvents {
    /// Wait for the terminal event.
    ///
    /// # Errors
    ///
    /// Returns the abort reason, or [`WalletError::Interrupted`] if the
    /// transfer task ended without a terminal event.
    pub async fn finish(mut self) -> Result<TransferOutcome, WalletError> {
        while let Some(event) = self.rx.recv().await {
            match event {
                TransferEvent::Confirmed {
                    tx_hash,
                    block_number,
                } => {
                    return Ok(TransferOutcome {
                        tx_hash,
                        status: TransferStatus::Confirmed,
                        block_number,
                    });
                }
                TransferEvent::Failed { tx_hash } => {
                    return Ok(TransferOutcome {
                        tx_hash,
                        status: TransferStatus::Failed,
                        block_number: None,
                    });
                }
                TransferEvent::Aborted(err) => return Err(err),
                TransferEvent::Stage(_) | TransferEvent::Pending { .. } => {}
            }
        }
        Err(WalletError::Interrupted)
    }
}

/// Fail unless `balance` covers `amount` plus `gas_limit * fee_rate`.
///
/// Returns the total cost on success.
///
/// # Errors
///
/// Returns [`WalletError::InsufficientFunds`] with
/// [`ShortfallCause::Amount`] if the amount alone is not covered, and with
/// [`ShortfallCause::Fees`] if only the fees tip it over.
pub fn check_affordable(
    balance: U256,
    amount: U256,
    gas_limit: u64,
    fee_rate: u128,
) -> Result<U256, WalletError> {
    let total = amount.saturating_add(U256::from(gas_limit) * U256::from(fee_rate));
    if balance < amount {
        return Err(WalletError::InsufficientFunds {
            cause: ShortfallCause::Amount,
            required: amount,
            available: balance,
        });
    }
    if balance < total {
        return Err(WalletError::InsufficientFunds {
            cause: ShortfallCause::Fees,
            required: total,
            available: balance,
        });
    }
    Ok(total)
}

enum Halt {
    /// The caller stopped listening before anything was broadcast.
    Abandoned,
    Abort(WalletError),
}

impl From<WalletError> for Halt {
    fn from(err: WalletError) -> Self {
        Self::Abort(err)
    }
}

struct Prepared {
    client: Arc<dyn ChainClient>,
    recipient: Address,
    amount: U256,
    gas_limit: u64,
    fee_rate: u128,
}

async fn emit(events: &mpsc::Sender<TransferEvent>, stage: Stage) -> Result<(), Halt> {
    debug!(?stage, "transfer stage");
    events
        .send(TransferEvent::Stage(stage))
        .await
        .map_err(|_| Halt::Abandoned)
}

fn estimation_failed(err: &ChainError) -> WalletError {
    WalletError::EstimationFailed(err.to_string())
}

/// Runs transfers as tracked background tasks.
#[derive(Debug, Clone)]
pub struct TransactionEngine {
    registry: Arc<ChainRegistry>,
    pool: Arc<ProviderPool>,
    wallets: Arc<WalletStore>,
    confirmation_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TransactionEngine {
    /// Create an engine.
    ///
    /// Cancelling `shutdown` interrupts transfers that have not been
    /// broadcast yet and resolves outstanding confirmation waits to
    /// [`WalletError::ConfirmationUnknown`].
    #[must_use]
    pub fn new(
        registry: Arc<ChainRegistry>,
        pool: Arc<ProviderPool>,
        wallets: Arc<WalletStore>,
        confirmation_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            pool,
            wallets,
            confirmation_timeout,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Start a transfer and return its event stream.
    pub fn send(&self, request: TransferRequest) -> TransferEvents {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let span = info_span!(
            "transfer",
            user_id = %request.user_id,
            chain_id = request.chain_id,
        );
        let engine = self.clone();
        self.tracker
            .spawn(async move { engine.run(request, tx).await }.instrument(span));
        TransferEvents { rx }
    }

    /// Spawn a follow-up task that should be awaited on shutdown.
    pub fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Stop accepting work and wait for every transfer task to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn run(self, request: TransferRequest, events: mpsc::Sender<TransferEvent>) {
        let prepared = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Halt::Abort(WalletError::Interrupted)),
            prepared = self.prepare(&request, &events) => prepared,
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(Halt::Abandoned) => {
                info!(
                    monotonic_counter.transfers = 1_u64,
                    outcome = "abandoned",
                    "transfer abandoned before broadcast"
                );
                return;
            }
            Err(Halt::Abort(err)) => {
                info!(
                    monotonic_counter.transfers = 1_u64,
                    outcome = "aborted",
                    reason = err.kind(),
                    error = %err,
                    "transfer aborted"
                );
                let _ = events.send(TransferEvent::Aborted(err)).await;
                return;
            }
        };

        let client = Arc::clone(&prepared.client);
        let tx_hash = match self.broadcast(&request.user_id, prepared).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                warn!(
                    monotonic_counter.transfers = 1_u64,
                    outcome = "aborted",
                    reason = err.kind(),
                    error = %err,
                    "broadcast failed"
                );
                let _ = events.send(TransferEvent::Aborted(err)).await;
                return;
            }
        };

        info!(%tx_hash, "transfer pending");
        if events.send(TransferEvent::Pending { tx_hash }).await.is_err() {
            debug!(%tx_hash, "listener gone, still tracking confirmation");
        }

        let terminal = self.confirm(client.as_ref(), tx_hash).await;
        let _ = events.send(terminal).await;
    }

    async fn prepare(
        &self,
        request: &TransferRequest,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<Prepared, Halt> {
        emit(events, Stage::Validating).await?;
        let chain = self
            .registry
            .describe(request.chain_id)
            .ok_or(WalletError::UnknownChain(request.chain_id))?;
        let from = self.wallets.address_of(&request.user_id).ok_or_else(|| {
            WalletError::not_found(format!("no wallet for user {}", request.user_id))
        })?;
        let recipient = parse_address(&request.recipient)?;
        let amount = parse_amount(&request.amount, chain.native_decimals())?;

        emit(events, Stage::Estimating).await?;
        let client = self
            .pool
            .client_for(request.chain_id)
            .await
            .map_err(|e| WalletError::EstimationFailed(e.to_string()))?;
        let (balance, gas_limit, fee_rate) = tokio::join!(
            client.native_balance(from),
            client.estimate_transfer_gas(from, recipient, amount),
            client.fee_rate(),
        );
        // nodes refuse to estimate transfers the sender cannot cover
        if let Ok(balance) = &balance
            && *balance < amount
        {
            return Err(WalletError::InsufficientFunds {
                cause: ShortfallCause::Amount,
                required: amount,
                available: *balance,
            }
            .into());
        }
        let balance = balance.map_err(|e| estimation_failed(&e))?;
        let gas_limit = gas_limit.map_err(|e| estimation_failed(&e))?;
        let fee_rate = fee_rate.map_err(|e| estimation_failed(&e))?;
        debug!(%balance, gas_limit, fee_rate, "estimated");

        emit(events, Stage::Affording).await?;
        check_affordable(balance, amount, gas_limit, fee_rate)?;

        emit(events, Stage::Broadcasting).await?;
        Ok(Prepared {
            client,
            recipient,
            amount,
            gas_limit,
            fee_rate,
        })
    }

    async fn broadcast(&self, user_id: &str, prepared: Prepared) -> Result<TxHash, WalletError> {
        let signer = self
            .wallets
            .get_wallet(user_id)
            .ok_or_else(|| WalletError::not_found(format!("no wallet for user {user_id}")))?
            .signer()?;

        prepared
            .client
            .broadcast_native_transfer(
                signer,
                prepared.recipient,
                prepared.amount,
                prepared.gas_limit,
                prepared.fee_rate,
            )
            .await
            .map_err(|e| match e {
                ChainError::Submission(msg) | ChainError::Rpc(msg) | ChainError::ContractCall(msg) => {
                    WalletError::SubmissionFailed(msg)
                }
            })
    }

    async fn confirm(&self, client: &dyn ChainClient, tx_hash: TxHash) -> TransferEvent {
        let wait = tokio::time::timeout(self.confirmation_timeout, client.await_inclusion(tx_hash));
        let unknown = TransferEvent::Aborted(WalletError::ConfirmationUnknown { tx_hash });

        tokio::select! {
            () = self.shutdown.cancelled() => {
                warn!(
                    monotonic_counter.transfers = 1_u64,
                    outcome = "unknown",
                    %tx_hash,
                    "shutting down before confirmation"
                );
                unknown
            }
            result = wait => match result {
                Ok(Ok(Inclusion { status: InclusionStatus::Success, block_number })) => {
                    info!(
                        monotonic_counter.transfers = 1_u64,
                        outcome = "confirmed",
                        %tx_hash,
                        ?block_number,
                        "transfer confirmed"
                    );
                    TransferEvent::Confirmed { tx_hash, block_number }
                }
                Ok(Ok(Inclusion { status: InclusionStatus::Reverted, block_number })) => {
                    warn!(
                        monotonic_counter.transfers = 1_u64,
                        outcome = "failed",
                        %tx_hash,
                        ?block_number,
                        "transfer reverted"
                    );
                    TransferEvent::Failed { tx_hash }
                }
                Ok(Err(error)) => {
                    warn!(
                        monotonic_counter.transfers = 1_u64,
                        outcome = "unknown",
                        %tx_hash,
                        %error,
                        "lost node during confirmation"
                    );
                    unknown
                }
                Err(_) => {
                    warn!(
                        monotonic_counter.transfers = 1_u64,
                        outcome = "unknown",
                        %tx_hash,
                        timeout = ?self.confirmation_timeout,
                        "confirmation timed out"
                    );
                    unknown
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::testing::{Harness, MockInclusion};

    fn eth(milli: u64) -> U256 {
        U256::from(milli) * U256::from(10u64).pow(U256::from(15u8))
    }

    fn request(recipient: &str, amount: &str) -> TransferRequest {
        TransferRequest {
            user_id: "alice".into(),
            chain_id: 1,
            recipient: recipient.into(),
            amount: amount.into(),
        }
    }

    const BOB: &str = "0x00000000000000000000000000000000000000b0";

    async fn funded(balance: U256) -> Harness {
        let harness = Harness::new().await;
        let wallet = harness.wallets.create_wallet("alice").await.unwrap();
        harness.chain.set_native_balance(wallet.address, balance);
        harness
    }

    #[test]
    fn affordability_boundaries() {
        let (a, g, f) = (U256::from(100u32), 10u64, 2u128);
        let total = U256::from(120u32);

        let below_amount = check_affordable(U256::from(99u32), a, g, f).unwrap_err();
        assert!(matches!(
            below_amount,
            WalletError::InsufficientFunds { cause: ShortfallCause::Amount, required, available }
                if required == a && available == U256::from(99u32)
        ));

        for balance in [100u32, 119] {
            let err = check_affordable(U256::from(balance), a, g, f).unwrap_err();
            assert!(matches!(
                err,
                WalletError::InsufficientFunds { cause: ShortfallCause::Fees, required, .. }
                    if required == total
            ));
        }

        assert_eq!(check_affordable(total, a, g, f).unwrap(), total);
        assert_eq!(check_affordable(U256::MAX, a, g, f).unwrap(), total);
    }

    #[tokio::test]
    async fn confirmed_transfer_emits_every_stage() {
        let harness = funded(eth(1_000)).await;
        harness.chain.set_inclusion(MockInclusion::Mined(InclusionStatus::Success, 42));

        let events: Vec<_> = harness.engine.send(request(BOB, "0.5")).collect().await;
        let stages: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Stage(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            [Stage::Validating, Stage::Estimating, Stage::Affording, Stage::Broadcasting]
        );
        assert!(matches!(events[4], TransferEvent::Pending { .. }));
        assert!(matches!(
            events[5],
            TransferEvent::Confirmed { block_number: Some(42), .. }
        ));
        assert_eq!(events.len(), 6);

        let sent = harness.chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, parse_address(BOB).unwrap());
        assert_eq!(sent[0].2, eth(500));
    }

    #[tokio::test]
    async fn reverted_transfer_is_failed_not_aborted() {
        let harness = funded(eth(1_000)).await;
        harness.chain.set_inclusion(MockInclusion::Mined(InclusionStatus::Reverted, 7));

        let outcome = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap();
        assert_eq!(outcome.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn amount_above_balance_never_broadcasts() {
        let harness = funded(eth(100)).await;

        let err = harness.engine.send(request(BOB, "1")).finish().await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds { cause: ShortfallCause::Amount, .. }
        ));
        assert_eq!(harness.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn amount_above_balance_wins_over_estimation_failure() {
        let harness = funded(eth(100)).await;
        harness
            .chain
            .fail_estimation(Some(ChainError::Rpc("insufficient funds for transfer".into())));

        let err = harness.engine.send(request(BOB, "1")).finish().await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds { cause: ShortfallCause::Amount, .. }
        ));
    }

    #[tokio::test]
    async fn fees_shortfall_is_distinguished() {
        // 21000 gas at 1 gwei costs 0.000021 ETH
        let harness = funded(eth(1_000)).await;

        let err = harness.engine.send(request(BOB, "1")).finish().await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds { cause: ShortfallCause::Fees, .. }
        ));
        assert_eq!(harness.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn estimation_failure_aborts() {
        let harness = funded(eth(1_000)).await;
        harness.chain.fail_estimation(Some(ChainError::Rpc("timeout".into())));

        let err = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap_err();
        assert_eq!(err.kind(), "estimation_failed");
        assert_eq!(harness.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn invalid_inputs_abort_before_estimating() {
        let harness = funded(eth(1_000)).await;

        for (recipient, amount) in [("0xnothex", "0.1"), (BOB, "-1"), (BOB, "0"), (BOB, "abc")] {
            let events: Vec<_> = harness.engine.send(request(recipient, amount)).collect().await;
            assert_eq!(events.len(), 2, "{recipient} {amount}");
            assert!(matches!(
                &events[1],
                TransferEvent::Aborted(WalletError::InvalidInput(_))
            ));
        }
        assert_eq!(harness.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn user_without_wallet_is_not_found() {
        let harness = Harness::new().await;
        let err = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn rejected_broadcast_is_submission_failure() {
        let harness = funded(eth(1_000)).await;
        harness
            .chain
            .reject_broadcast(Some(ChainError::Submission("nonce too low".into())));

        let err = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap_err();
        assert_eq!(err.kind(), "submission_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_is_unknown_not_failed() {
        let harness = funded(eth(1_000)).await;
        harness.chain.set_inclusion(MockInclusion::Never);

        let mut events = harness.engine.send(request(BOB, "0.1"));
        let tx_hash = loop {
            if let Some(TransferEvent::Pending { tx_hash }) = events.next().await {
                break tx_hash;
            }
        };
        let err = events.finish().await.unwrap_err();
        assert!(matches!(err, WalletError::ConfirmationUnknown { tx_hash: h } if h == tx_hash));
    }

    #[tokio::test]
    async fn node_loss_during_confirmation_is_unknown() {
        let harness = funded(eth(1_000)).await;
        harness
            .chain
            .set_inclusion(MockInclusion::Lost(ChainError::Rpc("connection reset".into())));

        let err = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap_err();
        assert_eq!(err.kind(), "confirmation_unknown");
    }

    #[tokio::test]
    async fn shutdown_resolves_pending_confirmation() {
        let harness = funded(eth(1_000)).await;
        harness.chain.set_inclusion(MockInclusion::Never);

        let mut events = harness.engine.send(request(BOB, "0.1"));
        while let Some(event) = events.next().await {
            if matches!(event, TransferEvent::Pending { .. }) {
                break;
            }
        }
        harness.shutdown.cancel();

        let err = events.finish().await.unwrap_err();
        assert_eq!(err.kind(), "confirmation_unknown");
        harness.engine.drain().await;
    }

    #[tokio::test]
    async fn shutdown_before_broadcast_interrupts() {
        let harness = funded(eth(1_000)).await;
        harness.shutdown.cancel();

        let err = harness.engine.send(request(BOB, "0.1")).finish().await.unwrap_err();
        assert_eq!(err.kind(), "interrupted");
        assert_eq!(harness.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn dropped_listener_abandons_before_broadcast() {
        let harness = funded(eth(1_000)).await;

        drop(harness.engine.send(request(BOB, "0.1")));
        harness.engine.drain().await;
        assert_eq!(harness.chain.broadcast_count(), 0);
    }
}
