//! Custodial key generation and signer reconstruction.
//!
//! Fresh wallets come from 128 bits of OS-seeded entropy, encoded as a
//! 12-word BIP-39 English mnemonic and derived along the BIP-44 Ethereum
//! path with the [`kobe`] crate family. The stored private key is only ever
//! turned back into a [`PrivateKeySigner`] for a single broadcast.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// BIP-44 derivation path of the first Ethereum account (`MetaMask` compatible).
pub const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// 128 bits, i.e. a 12-word mnemonic.
const ENTROPY_BYTES: usize = 16;

/// Secrets of a freshly created wallet.
pub struct KeyMaterial {
    /// Address derived from the private key.
    pub address: Address,
    /// 0x-prefixed hex private key.
    pub private_key: Zeroizing<String>,
    /// BIP-39 recovery phrase.
    pub mnemonic: Zeroizing<String>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Generate a new random key pair.
///
/// # Errors
///
/// Returns [`WalletError::Key`] if mnemonic encoding or derivation fails.
pub fn generate() -> Result<KeyMaterial, WalletError> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
    rand::rng().fill_bytes(entropy.as_mut());

    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy.as_ref())
        .map_err(|e| WalletError::Key(format!("mnemonic encoding failed: {e}")))?;
    let phrase = Zeroizing::new(mnemonic.to_string());
    from_mnemonic(&phrase)
}

/// Derive the wallet for an existing recovery phrase.
///
/// # Errors
///
/// Returns [`WalletError::Key`] if the phrase is invalid or derivation fails.
pub fn from_mnemonic(phrase: &str) -> Result<KeyMaterial, WalletError> {
    let wallet = kobe::Wallet::from_mnemonic(phrase, None)
        .map_err(|e| WalletError::Key(format!("invalid mnemonic: {e}")))?;
    let derived = kobe_eth::Deriver::new(&wallet)
        .derive_path(DERIVATION_PATH)
        .map_err(|e| WalletError::Key(format!("key derivation failed: {e}")))?;

    let private_key = Zeroizing::new(format!("0x{}", &*derived.private_key_hex));
    let address = signer(&private_key)?.address();
    Ok(KeyMaterial {
        address,
        private_key,
        mnemonic: Zeroizing::new(phrase.to_owned()),
    })
}

/// Rebuild a signer from stored key material.
///
/// # Errors
///
/// Returns [`WalletError::Key`] if the key is not valid hex for a secp256k1
/// scalar.
pub fn signer(private_key: &str) -> Result<PrivateKeySigner, WalletError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    key.parse::<PrivateKeySigner>()
        .map_err(|_| WalletError::Key("stored private key is malformed".into()))
}
