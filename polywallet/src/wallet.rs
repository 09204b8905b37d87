//! Wallet and session records and the store that owns them.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use zeroize::Zeroizing;

use crate::chain::{ChainId, ChainRegistry};
use crate::error::WalletError;
use crate::keys::{self, KeyMaterial};
use crate::locks::UserLocks;
use crate::store::{DocumentStore, Shared, WalletDocument};

/// One custodial key pair, shared by every chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Owner.
    #[serde(default)]
    pub user_id: String,
    /// Address derived from the private key at creation.
    pub address: Address,
    private_key: Zeroizing<String>,
    mnemonic: Zeroizing<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Bind freshly generated key material to a user.
    #[must_use]
    pub fn new(user_id: String, keys: KeyMaterial, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            address: keys.address,
            private_key: keys.private_key,
            mnemonic: keys.mnemonic,
            created_at,
        }
    }

    /// Recovery phrase, shown to the user once at creation.
    pub(crate) fn recovery_phrase(&self) -> &str {
        &self.mnemonic
    }

    /// Rebuild the signer for a single broadcast.
    pub(crate) fn signer(&self) -> Result<PrivateKeySigner, WalletError> {
        keys::signer(&self.private_key)
    }
}

/// Per-user selection of the active chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Owner.
    #[serde(default)]
    pub user_id: String,
    /// Chain all current-chain operations run against.
    pub current_chain: ChainId,
}

impl Session {
    /// Create a session on `chain_id`.
    #[must_use]
    pub const fn new(user_id: String, current_chain: ChainId) -> Self {
        Self {
            user_id,
            current_chain,
        }
    }
}

/// Owns wallets and sessions and persists them on every mutation.
#[derive(Debug)]
pub struct WalletStore {
    registry: Arc<ChainRegistry>,
    store: Arc<dyn DocumentStore>,
    home_chain: ChainId,
    doc: Shared<WalletDocument>,
    locks: UserLocks,
}

impl WalletStore {
    /// Load the wallet document from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnknownChain`] if `home_chain` is not in the
    /// registry, or [`WalletError::Storage`] if the document cannot be read.
    pub async fn load(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn DocumentStore>,
        home_chain: ChainId,
    ) -> Result<Self, WalletError> {
        if !registry.contains(home_chain) {
            return Err(WalletError::UnknownChain(home_chain));
        }
        let doc = store.load_wallets().await?;
        info!(wallets = doc.wallets.len(), "wallet document loaded");
        Ok(Self {
            registry,
            store,
            home_chain,
            doc: Shared::new(doc),
            locks: UserLocks::new(),
        })
    }

    /// Chain new sessions start on.
    #[must_use]
    pub const fn home_chain(&self) -> ChainId {
        self.home_chain
    }

    /// Generate a wallet for `user_id` and reset their session to the home chain.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::AlreadyExists`] if the user already has a wallet;
    /// the existing wallet is left untouched.
    #[instrument(skip(self))]
    pub async fn create_wallet(&self, user_id: &str) -> Result<Wallet, WalletError> {
        let _user = self.locks.lock(user_id).await;
        if self.doc.snapshot().wallets.contains_key(user_id) {
            return Err(WalletError::AlreadyExists(user_id.to_owned()));
        }

        let wallet = Wallet::new(user_id.to_owned(), keys::generate()?, Utc::now());
        let mut draft = self.doc.begin().await;
        draft.doc.wallets.insert(user_id.to_owned(), wallet.clone());
        draft.doc.settings.insert(
            user_id.to_owned(),
            Session::new(user_id.to_owned(), self.home_chain),
        );
        self.store.save_wallets(&draft.doc).await?;
        draft.install();

        info!(address = %wallet.address, "wallet created");
        Ok(wallet)
    }

    /// The user's wallet, if any.
    #[must_use]
    pub fn get_wallet(&self, user_id: &str) -> Option<Wallet> {
        self.doc.snapshot().wallets.get(user_id).cloned()
    }

    /// The user's wallet address, if any.
    #[must_use]
    pub fn address_of(&self, user_id: &str) -> Option<Address> {
        self.doc.snapshot().wallets.get(user_id).map(|w| w.address)
    }

    /// The user's session, or a home-chain session if none is recorded.
    #[must_use]
    pub fn get_session(&self, user_id: &str) -> Session {
        self.doc
            .snapshot()
            .settings
            .get(user_id)
            .filter(|s| self.registry.contains(s.current_chain))
            .cloned()
            .unwrap_or_else(|| Session::new(user_id.to_owned(), self.home_chain))
    }

    /// Point the user's session at `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnknownChain`] without touching the session if
    /// the chain is not configured, and [`WalletError::NotFound`] if the user
    /// has no wallet.
    #[instrument(skip(self))]
    pub async fn switch_chain(&self, user_id: &str, chain_id: ChainId) -> Result<(), WalletError> {
        if !self.registry.contains(chain_id) {
            return Err(WalletError::UnknownChain(chain_id));
        }

        let _user = self.locks.lock(user_id).await;
        if !self.doc.snapshot().wallets.contains_key(user_id) {
            return Err(WalletError::not_found(format!("no wallet for user {user_id}")));
        }
        let mut draft = self.doc.begin().await;
        draft
            .doc
            .settings
            .insert(user_id.to_owned(), Session::new(user_id.to_owned(), chain_id));
        self.store.save_wallets(&draft.doc).await?;
        draft.install();

        info!("chain switched");
        Ok(())
    }
}
