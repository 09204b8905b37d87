//! Load-all/save-all document persistence.
//!
//! Two documents back the engine:
//!
//! - `wallets.json`: `{ "wallets": { userId: Wallet }, "settings": { userId: Session } }`
//! - `custom_tokens.json`: `{ userId: { chainId: [TokenRecord, ...] } }`
//!
//! Both are read in full at start-up and rewritten in full on every mutation.
//! [`Shared`] holds the in-memory copy and makes each mutation copy-on-write:
//! the edited draft is saved first and installed only if the save succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::debug;

use crate::chain::ChainId;
use crate::error::StorageError;
use crate::tokens::TokenRecord;
use crate::wallet::{Session, Wallet};

/// File name of the wallet/session document.
pub const WALLETS_FILE: &str = "wallets.json";

/// File name of the token document.
pub const TOKENS_FILE: &str = "custom_tokens.json";

/// Wallet and session records keyed by user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDocument {
    /// One wallet per user.
    #[serde(default)]
    pub wallets: BTreeMap<String, Wallet>,
    /// One session per user.
    #[serde(default)]
    pub settings: BTreeMap<String, Session>,
}

impl WalletDocument {
    /// Copy each map key into its record. Older files only carry the key.
    fn adopt_keys(&mut self) {
        for (user_id, wallet) in &mut self.wallets {
            wallet.user_id.clone_from(user_id);
        }
        for (user_id, session) in &mut self.settings {
            session.user_id.clone_from(user_id);
        }
    }
}

/// Registered tokens keyed by user id, then chain id, in registration order.
pub type TokenDocument = BTreeMap<String, BTreeMap<ChainId, Vec<TokenRecord>>>;

fn adopt_token_keys(doc: &mut TokenDocument) {
    for (user_id, chains) in doc {
        for (chain_id, tokens) in chains {
            for token in tokens {
                token.owner_user_id.clone_from(user_id);
                token.chain_id = *chain_id;
            }
        }
    }
}

/// Durable key-value persistence for the two documents.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Read the wallet/session document. A missing document is empty.
    async fn load_wallets(&self) -> Result<WalletDocument, StorageError>;

    /// Replace the wallet/session document.
    async fn save_wallets(&self, doc: &WalletDocument) -> Result<(), StorageError>;

    /// Read the token document. A missing document is empty.
    async fn load_tokens(&self) -> Result<TokenDocument, StorageError>;

    /// Replace the token document.
    async fn save_tokens(&self, doc: &TokenDocument) -> Result<(), StorageError>;
}

/// JSON files under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
        }

        Ok(Self { dir })
    }

    async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StorageError> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "document missing, starting empty");
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + Sync>(&self, name: &str, doc: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{name}.tmp"));

        tokio::fs::write(&temp_path, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&temp_path, &path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "document saved");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load_wallets(&self) -> Result<WalletDocument, StorageError> {
        let mut doc: WalletDocument = self.read(WALLETS_FILE).await?;
        doc.adopt_keys();
        Ok(doc)
    }

    async fn save_wallets(&self, doc: &WalletDocument) -> Result<(), StorageError> {
        self.write(WALLETS_FILE, doc).await
    }

    async fn load_tokens(&self) -> Result<TokenDocument, StorageError> {
        let mut doc: TokenDocument = self.read(TOKENS_FILE).await?;
        adopt_token_keys(&mut doc);
        Ok(doc)
    }

    async fn save_tokens(&self, doc: &TokenDocument) -> Result<(), StorageError> {
        self.write(TOKENS_FILE, doc).await
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    wallets: Mutex<WalletDocument>,
    tokens: Mutex<TokenDocument>,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail with an I/O error.
    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("store unavailable").into());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_wallets(&self) -> Result<WalletDocument, StorageError> {
        Ok(self.wallets.lock().clone())
    }

    async fn save_wallets(&self, doc: &WalletDocument) -> Result<(), StorageError> {
        self.check()?;
        *self.wallets.lock() = doc.clone();
        Ok(())
    }

    async fn load_tokens(&self) -> Result<TokenDocument, StorageError> {
        Ok(self.tokens.lock().clone())
    }

    async fn save_tokens(&self, doc: &TokenDocument) -> Result<(), StorageError> {
        self.check()?;
        *self.tokens.lock() = doc.clone();
        Ok(())
    }
}

/// In-memory copy of a document with serialized, copy-on-write commits.
///
/// Readers take cheap snapshots and never wait on a save in progress.
pub struct Shared<T> {
    current: RwLock<Arc<T>>,
    commit: AsyncMutex<()>,
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

impl<T: Clone> Shared<T> {
    /// Wrap a freshly loaded document.
    pub fn new(doc: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(doc)),
            commit: AsyncMutex::new(()),
        }
    }

    /// The currently installed document.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Start a commit: waits for any other commit, then clones the document.
    pub async fn begin(&self) -> Draft<'_, T> {
        let guard = self.commit.lock().await;
        let doc = T::clone(&self.snapshot());
        Draft {
            shared: self,
            doc,
            _guard: guard,
        }
    }
}

/// Editable copy of a [`Shared`] document.
///
/// Dropping it without [`install`](Self::install) discards the edit.
pub struct Draft<'a, T> {
    shared: &'a Shared<T>,
    /// The document being edited.
    pub doc: T,
    _guard: AsyncMutexGuard<'a, ()>,
}

impl<T> fmt::Debug for Draft<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft").finish_non_exhaustive()
    }
}

impl<T> Draft<'_, T> {
    /// Make the edited document current.
    pub fn install(self) {
        *self.shared.current.write() = Arc::new(self.doc);
    }
}
