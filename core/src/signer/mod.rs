//! # Signing Network
//!
//! Request and response shapes exchanged with committee members, and the
//! [`SigningNetwork`] seam the coordinator talks through.

use crate::errors::BridgeError;
use crate::registry::OperatorInfo;
use crate::types::{KeyPurpose, NodeId, NonceRecord};
use crate::wallet::Utxo;
use alloy::primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod http;

pub use http::HttpSigningNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignStatus {
    Successful,
    Rejected,
    Error,
}

/// The action a signing round authorizes. Members recompute `hash` from
/// authoritative sources before contributing a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum SignPayload {
    #[serde(rename = "mint")]
    Mint {
        tx: TxHash,
        bitcoin_address: String,
        amount: U256,
        to: Address,
        hash: B256,
    },
    #[serde(rename = "get_simple_withdraw_tx")]
    SimpleWithdraw {
        from: String,
        fee: u64,
        utxos: Vec<Utxo>,
        send_amount: u64,
        to: String,
        hash: B256,
    },
    #[serde(rename = "get_withdraw_tx")]
    BurnWithdraw {
        utxos: Vec<Utxo>,
        burn_tx_hash: TxHash,
        hash: B256,
        fee: u64,
    },
}

impl SignPayload {
    /// The digest the round signs.
    pub fn hash(&self) -> B256 {
        match self {
            SignPayload::Mint { hash, .. }
            | SignPayload::SimpleWithdraw { hash, .. }
            | SignPayload::BurnWithdraw { hash, .. } => *hash,
        }
    }

    pub fn with_hash(&self, digest: B256) -> Self {
        let mut payload = self.clone();
        match &mut payload {
            SignPayload::Mint { hash, .. }
            | SignPayload::SimpleWithdraw { hash, .. }
            | SignPayload::BurnWithdraw { hash, .. } => *hash = digest,
        }
        payload
    }
}

/// What every member of a round receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub key_id: String,
    pub key_type: String,
    pub public_key: PublicKey,
    pub party: Vec<NodeId>,
    pub nonces: BTreeMap<NodeId, NonceRecord>,
    pub payload: SignPayload,
}

/// Aggregated outcome of a successful round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
    pub result: SignStatus,
    pub public_nonce: PublicKey,
    #[serde(with = "hex::serde")]
    pub signature: [u8; 32],
    pub message: B256,
}

impl SignatureResult {
    /// `R.x || s`
    pub fn schnorr_bytes(&self) -> [u8; 64] {
        crate::frost::schnorr_signature_bytes(&self.public_nonce, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgResult {
    pub key_id: String,
    pub public_key: PublicKey,
    pub party: Vec<NodeId>,
}

#[async_trait]
pub trait SigningNetwork: Send + Sync + std::fmt::Debug + 'static {
    /// Asks `node` for `count` fresh single-use nonces.
    async fn request_nonces(
        &self,
        node: &OperatorInfo,
        count: usize,
    ) -> Result<Vec<NonceRecord>, BridgeError>;

    /// Asks `node` for its share of the round described by `request`.
    ///
    /// A member that refuses the action returns
    /// [`BridgeError::ValidationFailed`]; any other member-side failure is
    /// [`BridgeError::SignerFailed`].
    async fn request_partial_signature(
        &self,
        node: &OperatorInfo,
        request: &SignRequest,
    ) -> Result<[u8; 32], BridgeError>;

    /// Runs one distributed key generation among `party`.
    async fn request_dkg(
        &self,
        threshold: usize,
        party: &[OperatorInfo],
        purpose: KeyPurpose,
    ) -> Result<DkgResult, BridgeError>;
}
