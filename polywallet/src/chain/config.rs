//! Chain descriptor types and CAIP-2 keyed TOML (de)serialisation.

use std::collections::HashSet;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::ChainId;

/// CAIP-2 namespace for EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// Decimals of the native asset unless a chain overrides it.
pub const DEFAULT_NATIVE_DECIMALS: u8 = 18;

const fn default_native_decimals() -> u8 {
    DEFAULT_NATIVE_DECIMALS
}

/// Inner configuration for a chain (matches TOML structure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptorInner {
    /// Human-readable chain name.
    pub name: String,
    /// Native asset symbol.
    pub symbol: String,
    /// JSON-RPC endpoint. May reference `$VAR` / `${VAR}`, resolved at load time.
    pub rpc: String,
    /// Block explorer base URL.
    pub explorer: String,
    /// Optional display icon for front-ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Decimals of the native asset (default: 18).
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
}

/// Immutable description of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    /// Numeric EIP-155 chain id.
    pub chain_id: ChainId,
    /// TOML-level configuration.
    pub inner: ChainDescriptorInner,
}

impl ChainDescriptor {
    /// Returns the CAIP-2 identifier, e.g. `eip155:137`.
    #[must_use]
    pub fn caip2(&self) -> String {
        format!("{EIP155_NAMESPACE}:{}", self.chain_id)
    }

    /// Human-readable chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Native asset symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.inner.symbol
    }

    /// JSON-RPC endpoint.
    #[must_use]
    pub fn rpc(&self) -> &str {
        &self.inner.rpc
    }

    /// Decimals of the native asset.
    #[must_use]
    pub const fn native_decimals(&self) -> u8 {
        self.inner.native_decimals
    }

    /// Explorer page for an address.
    #[must_use]
    pub fn address_url(&self, address: impl std::fmt::Display) -> String {
        format!("{}/address/{address}", self.inner.explorer.trim_end_matches('/'))
    }

    /// Explorer page for a transaction.
    #[must_use]
    pub fn tx_url(&self, tx_hash: impl std::fmt::Display) -> String {
        format!("{}/tx/{tx_hash}", self.inner.explorer.trim_end_matches('/'))
    }
}

/// Parse a CAIP-2 key of the form `eip155:<id>`.
fn parse_chain_key(key: &str) -> Result<ChainId, String> {
    let (namespace, reference) = key
        .split_once(':')
        .ok_or_else(|| format!("chain key '{key}' is not a CAIP-2 identifier"))?;
    if namespace != EIP155_NAMESPACE {
        return Err(format!("Unexpected namespace: {namespace}"));
    }
    reference
        .parse()
        .map_err(|e| format!("invalid chain reference in '{key}': {e}"))
}

/// Ordered collection of [`ChainDescriptor`] entries.
///
/// Serialised as a TOML map keyed by CAIP-2 chain identifiers.
#[derive(Debug, Clone, Default)]
pub struct ChainsConfig(pub Vec<ChainDescriptor>);

impl Deref for ChainsConfig {
    type Target = Vec<ChainDescriptor>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for ChainsConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for chain in &self.0 {
            map.serialize_entry(&chain.caip2(), &chain.inner)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{MapAccess, Visitor};

        struct ChainsVisitor;

        impl<'de> Visitor<'de> for ChainsVisitor {
            type Value = ChainsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of chain identifiers to chain descriptors")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut chains = Vec::with_capacity(access.size_hint().unwrap_or(0));
                let mut seen = HashSet::new();

                while let Some(key) = access.next_key::<String>()? {
                    let chain_id = parse_chain_key(&key).map_err(serde::de::Error::custom)?;
                    if !seen.insert(chain_id) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate chain id {chain_id}"
                        )));
                    }
                    let inner: ChainDescriptorInner = access.next_value()?;
                    chains.push(ChainDescriptor { chain_id, inner });
                }

                Ok(ChainsConfig(chains))
            }
        }

        deserializer.deserialize_map(ChainsVisitor)
    }
}
