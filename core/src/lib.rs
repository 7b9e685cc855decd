//! # Custodial Bridge Coordinator
//!
//! Watches an EVM chain for token transfers into provisioned deposit
//! addresses, tracks them to finality and drives threshold signing rounds
//! for mint attestations and for withdrawals out of a Taproot custody
//! address.

pub mod builder;
pub mod chain;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod database;
pub mod errors;
pub mod finalizer;
pub mod frost;
pub mod keys;
pub mod nonce_pool;
pub mod observer;
pub mod orchestrator;
pub mod provisioner;
pub mod registry;
pub mod server;
pub mod settlement;
pub mod signer;
pub mod task;
pub mod types;
pub mod utils;
pub mod validator;
pub mod wallet;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;
