//! Scripted chain and fully wired components for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, TxHash, U256, address};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::balance::BalanceAggregator;
use crate::chain::{
    ChainClient, ChainDescriptor, ChainDescriptorInner, ChainRegistry, ChainsConfig,
    ClientConnector, Inclusion, InclusionStatus, ProviderPool, TokenMeta,
};
use crate::conversation::Conversations;
use crate::error::ChainError;
use crate::service::WalletService;
use crate::store::MemoryStore;
use crate::tokens::TokenRegistry;
use crate::transfer::TransactionEngine;
use crate::wallet::WalletStore;

/// USDC on Ethereum mainnet.
pub const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

/// Ethereum (1, ETH) and Polygon (137, MATIC).
pub fn registry() -> ChainRegistry {
    let chain = |chain_id, name: &str, symbol: &str| ChainDescriptor {
        chain_id,
        inner: ChainDescriptorInner {
            name: name.into(),
            symbol: symbol.into(),
            rpc: "http://127.0.0.1:8545".into(),
            explorer: "https://explorer.test".into(),
            icon: None,
            native_decimals: 18,
        },
    };
    ChainRegistry::new(&ChainsConfig(vec![
        chain(1, "Ethereum", "ETH"),
        chain(137, "Polygon", "MATIC"),
    ]))
}

/// How [`MockChain::await_inclusion`] resolves.
#[derive(Debug, Clone)]
pub enum MockInclusion {
    /// Included with the given status in the given block.
    Mined(InclusionStatus, u64),
    /// Never included.
    Never,
    /// The node fails while waiting.
    Lost(ChainError),
}

#[derive(Debug)]
struct MockToken {
    meta: TokenMeta,
    decimals: u8,
    balances: HashMap<Address, U256>,
    broken: bool,
    decimals_error: Option<ChainError>,
}

#[derive(Debug)]
struct MockState {
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, MockToken>,
    fail_native: bool,
    estimate_error: Option<ChainError>,
    gas_limit: u64,
    fee_rate: u128,
    broadcast_error: Option<ChainError>,
    inclusion: MockInclusion,
    sent: Vec<(Address, Address, U256)>,
}

/// In-memory chain with scripted answers; counts broadcasts.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<MockState>,
    broadcasts: AtomicUsize,
}

impl MockChain {
    /// 21000 gas at 1 gwei, every transaction mined successfully in block 1.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                native: HashMap::new(),
                tokens: HashMap::new(),
                fail_native: false,
                estimate_error: None,
                gas_limit: 21_000,
                fee_rate: 1_000_000_000,
                broadcast_error: None,
                inclusion: MockInclusion::Mined(InclusionStatus::Success, 1),
                sent: Vec::new(),
            }),
            broadcasts: AtomicUsize::new(0),
        })
    }

    pub fn add_token(&self, token: Address, name: &str, symbol: &str, decimals: u8) {
        self.state.lock().tokens.insert(
            token,
            MockToken {
                meta: TokenMeta {
                    name: name.into(),
                    symbol: symbol.into(),
                },
                decimals,
                balances: HashMap::new(),
                broken: false,
                decimals_error: None,
            },
        );
    }

    pub fn set_native_balance(&self, owner: Address, balance: U256) {
        self.state.lock().native.insert(owner, balance);
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, balance: U256) {
        if let Some(token) = self.state.lock().tokens.get_mut(&token) {
            token.balances.insert(owner, balance);
        }
    }

    /// Make every balance query of `token` revert.
    pub fn break_token(&self, token: Address) {
        if let Some(token) = self.state.lock().tokens.get_mut(&token) {
            token.broken = true;
        }
    }

    /// Fail only `decimals()` of `token`; name and symbol still answer.
    pub fn fail_decimals(&self, token: Address, error: ChainError) {
        if let Some(token) = self.state.lock().tokens.get_mut(&token) {
            token.decimals_error = Some(error);
        }
    }

    pub fn fail_native_balance(&self, fail: bool) {
        self.state.lock().fail_native = fail;
    }

    pub fn fail_estimation(&self, error: Option<ChainError>) {
        self.state.lock().estimate_error = error;
    }

    pub fn reject_broadcast(&self, error: Option<ChainError>) {
        self.state.lock().broadcast_error = error;
    }

    pub fn set_inclusion(&self, inclusion: MockInclusion) {
        self.state.lock().inclusion = inclusion;
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    /// `(from, to, value)` of every accepted broadcast.
    pub fn sent(&self) -> Vec<(Address, Address, U256)> {
        self.state.lock().sent.clone()
    }

    fn token<T>(&self, token: Address, read: impl FnOnce(&MockToken) -> T) -> Result<T, ChainError> {
        self.state
            .lock()
            .tokens
            .get(&token)
            .filter(|t| !t.broken)
            .map(read)
            .ok_or_else(|| ChainError::ContractCall("execution reverted".into()))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        let state = self.state.lock();
        if state.fail_native {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        Ok(state.native.get(&owner).copied().unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.token(token, |t| t.balances.get(&owner).copied().unwrap_or_default())
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.token(token, |t| t.decimals_error.clone().map_or(Ok(t.decimals), Err))?
    }

    async fn token_meta(&self, token: Address) -> Result<TokenMeta, ChainError> {
        self.token(token, |t| t.meta.clone())
    }

    async fn estimate_transfer_gas(
        &self,
        _from: Address,
        _to: Address,
        _value: U256,
    ) -> Result<u64, ChainError> {
        let state = self.state.lock();
        state
            .estimate_error
            .clone()
            .map_or(Ok(state.gas_limit), Err)
    }

    async fn fee_rate(&self) -> Result<u128, ChainError> {
        Ok(self.state.lock().fee_rate)
    }

    async fn broadcast_native_transfer(
        &self,
        signer: PrivateKeySigner,
        to: Address,
        value: U256,
        _gas_limit: u64,
        _fee_rate: u128,
    ) -> Result<TxHash, ChainError> {
        let mut state = self.state.lock();
        if let Some(error) = state.broadcast_error.clone() {
            return Err(error);
        }
        state.sent.push((signer.address(), to, value));
        let n = self.broadcasts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(B256::left_padding_from(&n.to_be_bytes()))
    }

    async fn await_inclusion(&self, _tx_hash: TxHash) -> Result<Inclusion, ChainError> {
        let inclusion = self.state.lock().inclusion.clone();
        match inclusion {
            MockInclusion::Mined(status, block) => Ok(Inclusion {
                status,
                block_number: Some(block),
            }),
            MockInclusion::Never => std::future::pending().await,
            MockInclusion::Lost(error) => Err(error),
        }
    }
}

/// Hands out one shared [`MockChain`] for every chain id.
#[derive(Debug)]
pub struct CountingConnector {
    chain: Arc<MockChain>,
    pub constructed: AtomicUsize,
}

impl CountingConnector {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            constructed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClientConnector for CountingConnector {
    async fn connect(&self, _chain: &ChainDescriptor) -> Result<Arc<dyn ChainClient>, ChainError> {
        tokio::task::yield_now().await;
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.chain) as Arc<dyn ChainClient>)
    }
}

pub fn pool_with(chain: &Arc<MockChain>) -> Arc<ProviderPool> {
    Arc::new(ProviderPool::new(
        Arc::new(registry()),
        Arc::new(CountingConnector::new(Arc::clone(chain))),
    ))
}

/// Every component wired over a [`MockChain`] and a [`MemoryStore`].
#[derive(Debug)]
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
    pub wallets: Arc<WalletStore>,
    pub tokens: Arc<TokenRegistry>,
    pub balances: BalanceAggregator,
    pub engine: TransactionEngine,
    pub service: WalletService,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new() -> Self {
        let chain = MockChain::new();
        let registry = Arc::new(registry());
        let pool = pool_with(&chain);
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();

        let wallets = Arc::new(
            WalletStore::load(Arc::clone(&registry), Arc::clone(&store) as _, 1)
                .await
                .unwrap(),
        );
        let tokens = Arc::new(
            TokenRegistry::load(Arc::clone(&pool), Arc::clone(&store) as _)
                .await
                .unwrap(),
        );
        let balances = BalanceAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::clone(&wallets),
            Arc::clone(&tokens),
        );
        let engine = TransactionEngine::new(
            Arc::clone(&registry),
            pool,
            Arc::clone(&wallets),
            Duration::from_secs(30),
            shutdown.clone(),
        );
        let service = WalletService::new(
            registry,
            Arc::clone(&wallets),
            Arc::clone(&tokens),
            balances.clone(),
            engine.clone(),
            Conversations::new(Duration::from_secs(300)),
        );

        Self {
            chain,
            store,
            wallets,
            tokens,
            balances,
            engine,
            service,
            shutdown,
        }
    }
}
