//! Chain registry, capability interface and shared client pool.
//!
//! - [`config`]: chain descriptors and CAIP-2 keyed TOML (de)serialisation.
//! - [`registry`]: [`ChainRegistry`], the immutable id → descriptor lookup.
//! - [`client`]: the [`ChainClient`] capability trait.
//! - [`evm`]: [`EvmClient`], the alloy-backed implementation.
//! - [`pool`]: [`ProviderPool`], one lazily built client per chain.

mod client;
mod config;
mod evm;
mod pool;
mod registry;

use alloy_primitives::Address;

pub use self::client::*;
pub use self::config::*;
pub use self::evm::EvmClient;
pub use self::pool::*;
pub use self::registry::ChainRegistry;
use crate::error::WalletError;

/// Numeric EIP-155 chain id.
pub type ChainId = u64;

/// Parse an address in the EIP-155 format (`0x` + 40 hex digits).
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lowercase and
/// all-uppercase input is accepted as is.
///
/// # Errors
///
/// Returns [`WalletError::InvalidInput`] for anything else.
pub fn parse_address(raw: &str) -> Result<Address, WalletError> {
    let raw = raw.trim();
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::invalid(format!("'{raw}' is not a 0x-prefixed address")))?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WalletError::invalid(format!("'{raw}' is not a 20-byte hex address")));
    }

    let mixed_case = hex.bytes().any(|b| b.is_ascii_lowercase())
        && hex.bytes().any(|b| b.is_ascii_uppercase());
    if mixed_case {
        Address::parse_checksummed(raw, None)
            .map_err(|_| WalletError::invalid(format!("'{raw}' has an invalid checksum")))
    } else {
        raw.parse()
            .map_err(|e| WalletError::invalid(format!("'{raw}': {e}")))
    }
}
