//! # Bridge Data Model
//!
//! Records shared by the observation pipeline and the signing side.

use alloy::primitives::{keccak256, Address, TxHash, B256, U256};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::BridgeError;

pub type ChainId = u64;

/// Lifecycle state of an observed transfer.
///
/// Allowed transitions: `PENDING -> FINALIZED | REORG`, `FINALIZED -> VERIFIED |
/// REJECTED`. Nothing leads back to `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Pending,
    Finalized,
    Verified,
    Reorg,
    Rejected,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Finalized => "FINALIZED",
            TransferStatus::Verified => "VERIFIED",
            TransferStatus::Reorg => "REORG",
            TransferStatus::Rejected => "REJECTED",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Pending, TransferStatus::Finalized)
                | (TransferStatus::Pending, TransferStatus::Reorg)
                | (TransferStatus::Finalized, TransferStatus::Verified)
                | (TransferStatus::Finalized, TransferStatus::Rejected)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransferStatus::Pending),
            "FINALIZED" => Ok(TransferStatus::Finalized),
            "VERIFIED" => Ok(TransferStatus::Verified),
            "REORG" => Ok(TransferStatus::Reorg),
            "REJECTED" => Ok(TransferStatus::Rejected),
            other => Err(BridgeError::MalformedRecord(format!(
                "unknown transfer status {other}"
            ))),
        }
    }
}

/// A token transfer seen on the watched chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_hash: TxHash,
    pub chain_id: ChainId,
    pub value: U256,
    pub token_address: Address,
    pub destination_address: Address,
    pub block_number: u64,
    /// Unix timestamp in seconds.
    pub observed_at: u64,
    pub status: TransferStatus,
}

impl Transfer {
    pub fn pending(
        chain_id: ChainId,
        tx_hash: TxHash,
        token_address: Address,
        destination_address: Address,
        value: U256,
        block_number: u64,
    ) -> Self {
        Self {
            tx_hash,
            chain_id,
            value,
            token_address,
            destination_address,
            block_number,
            observed_at: unix_now(),
            status: TransferStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedAddress {
    pub user_id: u64,
    pub address: Address,
    pub is_active: bool,
}

/// Identity of a committee member, derived from its on-chain operator
/// address with keccak256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub B256);

impl NodeId {
    pub fn from_operator(address: &Address) -> Self {
        NodeId(keccak256(address.as_slice()))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(NodeId)
            .map_err(|e| BridgeError::MalformedRecord(format!("invalid node id {s}: {e}")))
    }
}

/// What a threshold key is used for. Each purpose has at most one active key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum KeyPurpose {
    #[serde(rename = "BTC-custody")]
    #[value(name = "btc-custody")]
    BtcCustody,
    #[serde(rename = "ETH-attestation")]
    #[value(name = "eth-attestation")]
    EthAttestation,
}

impl KeyPurpose {
    /// Key type name understood by the signing network.
    pub fn key_type(&self) -> &'static str {
        match self {
            KeyPurpose::BtcCustody => "BTC",
            KeyPurpose::EthAttestation => "ETH",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPurpose::BtcCustody => f.write_str("BTC-custody"),
            KeyPurpose::EthAttestation => f.write_str("ETH-attestation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Identifier assigned by the signing network.
    pub key_id: String,
    pub purpose: KeyPurpose,
    pub public_key: PublicKey,
    pub committee: Vec<NodeId>,
    pub threshold: usize,
    pub created_at: u64,
}

impl SigningKey {
    /// Custody address controlled by this key.
    pub fn taproot_address(&self, network: Network) -> bitcoin::Address {
        crate::builder::address::custody_address(&self.public_key, network)
    }
}

/// The two public commitments of a FROST signing nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicNonce {
    pub d: PublicKey,
    pub e: PublicKey,
}

/// One single-use nonce, as seen by the coordinator. The secret half stays on
/// the node; `private_commitment` is the handle the node uses to find it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonceRecord {
    pub public_part: PublicNonce,
    pub private_commitment: String,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_never_return_to_pending() {
        let all = [
            TransferStatus::Pending,
            TransferStatus::Finalized,
            TransferStatus::Verified,
            TransferStatus::Reorg,
            TransferStatus::Rejected,
        ];
        for from in all {
            assert!(!from.can_transition_to(TransferStatus::Pending));
        }
        assert!(!TransferStatus::Finalized.can_transition_to(TransferStatus::Reorg));
        assert!(!TransferStatus::Reorg.can_transition_to(TransferStatus::Finalized));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [TransferStatus::Pending, TransferStatus::Reorg] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
        assert!("pending".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn node_id_is_keccak_of_address() {
        let address = Address::repeat_byte(0x11);
        let id = NodeId::from_operator(&address);
        assert_eq!(id.0, keccak256(address.as_slice()));
        assert_ne!(id, NodeId::from_operator(&Address::repeat_byte(0x12)));
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn key_purpose_serializes_with_hyphenated_names() {
        let json = serde_json::to_string(&KeyPurpose::BtcCustody).unwrap();
        assert_eq!(json, "\"BTC-custody\"");
        assert_eq!(KeyPurpose::EthAttestation.key_type(), "ETH");
    }
}
