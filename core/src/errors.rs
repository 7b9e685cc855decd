//! # Errors
//!
//! This module defines errors, returned by the library.
//!
//! Errors fall in four groups. Transient upstream errors are retried by the
//! polling loops, validation failures reject a single signing round,
//! protocol-integrity failures abort the current action and configuration
//! errors abort the process.

use crate::types::{KeyPurpose, NodeId, TransferStatus};
use alloy::primitives::TxHash;
use core::fmt::Debug;
use thiserror::Error;

/// Errors returned by the bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// Returned when the bitcoin::secp256k1 crate returns an error
    #[error("Secp256k1Error: {0}")]
    Secp256k1Error(#[from] bitcoin::secp256k1::Error),
    #[error("Scalar can't be built: {0}")]
    Secp256k1ScalarOutOfRange(#[from] bitcoin::secp256k1::scalar::OutOfRangeError),
    /// Returned when the bitcoin crate returns an error in the sighash taproot module
    #[error("BitcoinSighashTaprootError: {0}")]
    BitcoinSighashTaprootError(#[from] bitcoin::sighash::TaprootError),
    /// Returned when bitcoin::Transaction error happens, also returns the error
    #[error("BitcoinTransactionError: {0}")]
    BitcoinConsensusEncodeError(#[from] bitcoin::consensus::encode::Error),
    /// Bitcoin Address Parse Error, probably given address network is invalid
    #[error("BitcoinAddressParseError: {0}")]
    BitcoinAddressParseError(#[from] bitcoin::address::ParseError),
    #[error("Invalid hex string: {0}")]
    FromHexError(#[from] hex::FromHexError),
    #[error("Invalid txid: {0}")]
    TxidParseError(#[from] bitcoin::hex::HexToArrayError),

    /// Database error
    #[error("DatabaseError: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Stored value is malformed: {0}")]
    MalformedRecord(String),

    #[error("Chain RPC error: {0}")]
    ChainRpc(String),
    #[error("Transport error: {0}")]
    TransportError(#[from] alloy::transports::TransportError),
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Operator registry is unavailable: {0}")]
    Registry(String),
    #[error("Bitcoin wallet backend error: {0}")]
    Wallet(String),

    #[error("Transfer {1} on chain {0} not found")]
    TransferNotFound(u64, TxHash),
    #[error("Transfer {tx_hash} is {status}, expected {expected}")]
    UnexpectedTransferStatus {
        tx_hash: TxHash,
        status: TransferStatus,
        expected: TransferStatus,
    },
    #[error("Burn event not found in transaction {0}")]
    BurnNotFound(TxHash),
    #[error("Not enough funds in {address}: need {needed} sats, have {available} sats")]
    InsufficientFunds {
        address: String,
        needed: u64,
        available: u64,
    },

    /// A committee member recomputed the action and it did not match.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Caller {0} is not allowed to call {1}")]
    CallerNotAllowed(String, String),

    #[error("Not enough nonces for {purpose} on node {node}")]
    InsufficientNonces { node: NodeId, purpose: KeyPurpose },
    #[error("No nonce selection with an even aggregate after {0} attempts")]
    NonceParityExhausted(usize),
    #[error("Failed to allocate nonces from nodes: {0:?}")]
    NonceAllocationFailed(Vec<NodeId>),
    #[error("Key generation for {0} exhausted {1} attempts without a normalized key")]
    KeyParityExhausted(KeyPurpose, usize),
    #[error("Key generation failed: {0}")]
    DkgFailed(String),
    #[error("Only {live} of the required {threshold} nodes are live")]
    NotEnoughLiveNodes { live: usize, threshold: usize },
    #[error("No active key for {0}")]
    KeyNotFound(KeyPurpose),
    #[error("Node {0} is not in the operator registry")]
    UnknownNode(NodeId),
    #[error("Signing round timed out after {0:?}")]
    RoundTimeout(std::time::Duration),
    #[error("Node {0} failed to sign: {1}")]
    SignerFailed(NodeId, String),
    #[error("Aggregated signature does not verify: {0}")]
    InvalidSignature(String),
    #[error("Transaction has {inputs} inputs but {witnesses} witnesses")]
    MissingWitness { inputs: usize, witnesses: usize },

    /// ConfigError is returned when the configuration is invalid
    #[error("ConfigError: {0}")]
    ConfigError(String),
    /// Returned when an environment variable is not set
    #[error("Environment variable {1} is not set: {0}")]
    EnvVarNotSet(std::env::VarError, &'static str),
    #[error("Environment variable {0} is malformed: {1}")]
    EnvVarMalformed(&'static str, String),
    /// There was an error while creating a server.
    #[error("Server can't be created: {0}")]
    ServerError(std::io::Error),

    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Eyre(#[from] eyre::Report),
}

impl BridgeError {
    /// Whether a polling loop should retry after this error instead of
    /// stopping.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::ChainRpc(_)
                | BridgeError::TransportError(_)
                | BridgeError::HttpError(_)
                | BridgeError::Registry(_)
                | BridgeError::DatabaseError(_)
                | BridgeError::Wallet(_)
        )
    }

    /// Whether a signing round failed because a member rejected the action.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, BridgeError::ValidationFailed(_))
    }
}
