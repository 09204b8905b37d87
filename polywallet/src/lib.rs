//! Custodial multi-chain EVM wallet engine.
//!
//! One secp256k1 key per user, valid on every configured EVM chain. The
//! crate provides:
//!
//! - [`chain`]: the chain registry, the chain client capability and the
//!   lazily populated provider pool.
//! - [`wallet`]: key generation, wallet custody and per-user sessions.
//! - [`tokens`]: per-user, per-chain custom token lists.
//! - [`balance`]: native and token balance reports.
//! - [`transfer`]: the native transfer state machine.
//! - [`service`] and [`routes`]: the front-end boundary and its HTTP API.

pub mod balance;
pub mod chain;
pub mod cmd;
pub mod config;
pub mod conversation;
pub mod error;
pub mod keys;
mod locks;
pub mod routes;
pub mod service;
pub mod signal;
pub mod store;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod tokens;
pub mod transfer;
pub mod units;
pub mod wallet;

#[cfg(test)]
mod testing;
