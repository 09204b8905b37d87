//! Configuration loading and default template generation.
//!
//! # Configuration File Format
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! home_chain = 1
//! data_dir = "data"
//!
//! [chains."eip155:137"]
//! name = "Polygon"
//! symbol = "MATIC"
//! rpc = "$POLYGON_RPC_URL"
//! explorer = "https://polygonscan.com"
//! ```

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chain::{ChainId, ChainsConfig};
use crate::error::Error;
use crate::units::MAX_DECIMALS;

mod defaults {
    use super::{IpAddr, Ipv4Addr, PathBuf, env};
    use crate::chain::ChainId;

    pub fn host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|h| h.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080)
    }

    pub const fn home_chain() -> ChainId {
        1
    }

    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    pub const fn confirmation_timeout_secs() -> u64 {
        300
    }

    pub const fn receipt_poll_interval_ms() -> u64 {
        2000
    }

    pub const fn prompt_timeout_secs() -> u64 {
        300
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::host")]
    host: IpAddr,
    #[serde(default = "defaults::port")]
    port: u16,
    #[serde(default = "defaults::home_chain")]
    home_chain: ChainId,
    #[serde(default = "defaults::data_dir")]
    data_dir: PathBuf,
    #[serde(default = "defaults::confirmation_timeout_secs")]
    confirmation_timeout_secs: u64,
    #[serde(default = "defaults::receipt_poll_interval_ms")]
    receipt_poll_interval_ms: u64,
    #[serde(default = "defaults::prompt_timeout_secs")]
    prompt_timeout_secs: u64,
    #[serde(default)]
    chains: ChainsConfig,
}

impl Config {
    /// Bind address.
    #[must_use]
    pub const fn host(&self) -> IpAddr {
        self.host
    }

    /// Bind port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Session chain for users that never switched.
    #[must_use]
    pub const fn home_chain(&self) -> ChainId {
        self.home_chain
    }

    /// Directory holding `wallets.json` and `custom_tokens.json`.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Upper bound on waiting for a broadcast transfer to be included.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Interval between receipt polls while confirming.
    #[must_use]
    pub const fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Age after which an unanswered prompt is treated as idle.
    #[must_use]
    pub const fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    /// Configured chains in declaration order.
    #[must_use]
    pub const fn chains(&self) -> &ChainsConfig {
        &self.chains
    }

    fn resolve_rpc_env(&mut self) -> Result<(), Error> {
        for chain in &mut self.chains.0 {
            chain.inner.rpc = resolve_env(&chain.inner.rpc)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.chains.is_empty() {
            return Err(Error::config("at least one chain must be configured"));
        }
        if !self.chains.iter().any(|c| c.chain_id == self.home_chain) {
            return Err(Error::config(format!(
                "home_chain {} is not a configured chain",
                self.home_chain
            )));
        }
        for chain in self.chains.iter() {
            check_http_url(&chain.caip2(), "rpc", &chain.inner.rpc)?;
            check_http_url(&chain.caip2(), "explorer", &chain.inner.explorer)?;
            if chain.native_decimals() > MAX_DECIMALS {
                return Err(Error::config(format!(
                    "{}: native_decimals must be at most {MAX_DECIMALS}, got {}",
                    chain.caip2(),
                    chain.native_decimals()
                )));
            }
        }
        Ok(())
    }
}

fn check_http_url(chain: &str, field: &str, raw: &str) -> Result<(), Error> {
    let url = Url::parse(raw)
        .map_err(|e| Error::config_with(format!("{chain}: invalid {field} url '{raw}'"), e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::config(format!(
            "{chain}: {field} must be http(s), got '{other}'"
        ))),
    }
}

/// Resolve an environment-variable reference (`$VAR` or `${VAR}`), returning
/// the literal string unchanged if it does not match either pattern.
fn resolve_env(value: &str) -> Result<String, Error> {
    let var_name = if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}'))
    {
        Some(name)
    } else {
        value
            .strip_prefix('$')
            .filter(|name| !name.is_empty())
            .filter(|name| name.chars().all(|c| c.is_alphanumeric() || c == '_'))
    };
    match var_name {
        Some(name) => env::var(name).map_err(|_| {
            Error::config(format!(
                "env var '{name}' not found (referenced as '{value}')"
            ))
        }),
        None => Ok(value.to_owned()),
    }
}

/// Load and validate configuration from a TOML file at the given path.
///
/// `host` and `port` fall back to the `HOST` and `PORT` environment
/// variables, then to `0.0.0.0:8080`. `$VAR` references in `rpc` values are
/// resolved before validation.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or parsed, an env
/// reference is missing, no chain is configured, `home_chain` is unknown or
/// an endpoint is not an http(s) URL.
pub fn load_config(path: &Path) -> Result<Config, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config_with(format!("failed to read config file '{}'", path.display()), e)
    })?;
    parse_config(&content)
        .map_err(|e| Error::config_with(format!("invalid config '{}'", path.display()), e))
}

fn parse_config(content: &str) -> Result<Config, Error> {
    let mut config: Config =
        toml::from_str(content).map_err(|e| Error::config_with("failed to parse TOML", e))?;
    config.resolve_rpc_env()?;
    config.validate()?;
    Ok(config)
}

/// Generate a default TOML configuration template.
#[must_use]
pub fn generate_default_config() -> String {
    String::from(
        r#"# polywallet configuration

# Server bind address and port.
# Can also be set via HOST / PORT environment variables.
host = "0.0.0.0"
port = 8080

# Chain new users start on.
home_chain = 1

# Directory for wallets.json and custom_tokens.json.
data_dir = "data"

# Transfer confirmation.
confirmation_timeout_secs = 300
receipt_poll_interval_ms = 2000

# Unanswered prompts expire after this many seconds.
prompt_timeout_secs = 300

# ── EVM chains ──────────────────────────────────────────────────────
# Key format: "eip155:<chain_id>"
# rpc values support environment variable references: "$VAR" or "${VAR}"

[chains."eip155:1"]
name = "Ethereum"
symbol = "ETH"
rpc = "https://eth.llamarpc.com"
explorer = "https://etherscan.io"
icon = "🔷"

[chains."eip155:137"]
name = "Polygon"
symbol = "MATIC"
rpc = "https://polygon-rpc.com"
explorer = "https://polygonscan.com"
icon = "🟣"

[chains."eip155:56"]
name = "BNB Chain"
symbol = "BNB"
rpc = "https://bsc-dataseed1.binance.org"
explorer = "https://bscscan.com"
icon = "🟡"

[chains."eip155:43114"]
name = "Avalanche"
symbol = "AVAX"
rpc = "https://api.avax.network/ext/bc/C/rpc"
explorer = "https://snowtrace.io"
icon = "🔺"

[chains."eip155:250"]
name = "Fantom"
symbol = "FTM"
rpc = "https://rpc.ftm.tools"
explorer = "https://ftmscan.com"
icon = "👻"

[chains."eip155:42161"]
name = "Arbitrum One"
symbol = "ETH"
rpc = "https://arb1.arbitrum.io/rpc"
explorer = "https://arbiscan.io"
icon = "🔵"

[chains."eip155:10"]
name = "Optimism"
symbol = "ETH"
rpc = "https://mainnet.optimism.io"
explorer = "https://optimistic.etherscan.io"
icon = "🔴"

[chains."eip155:25"]
name = "Cronos"
symbol = "CRO"
rpc = "https://evm.cronos.org"
explorer = "https://cronoscan.com"
icon = "💎"

[chains."eip155:1285"]
name = "Moonriver"
symbol = "MOVR"
rpc = "https://rpc.api.moonriver.moonbeam.network"
explorer = "https://moonriver.moonscan.io"
icon = "🌙"

[chains."eip155:100"]
name = "Gnosis Chain"
symbol = "xDAI"
rpc = "https://rpc.gnosischain.com"
explorer = "https://gnosisscan.io"
icon = "🟢"
"#,
    )
}
