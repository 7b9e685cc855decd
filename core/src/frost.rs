//! # FROST helpers
//!
//! Coordinator-side group arithmetic for FROST signing over secp256k1:
//! binding factors, the aggregate public nonce, combining partial signatures
//! and the parity checks used for nonce selection and key normalization.
//! Everything that needs a secret share happens on the signing nodes.

use crate::errors::BridgeError;
use crate::types::{NodeId, PublicNonce};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};
use lazy_static::lazy_static;
use std::collections::BTreeMap;

lazy_static! {
    pub static ref SECP: Secp256k1<All> = Secp256k1::new();
}

/// floor(n / 2) for the secp256k1 group order n, big endian.
pub const HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

const BINDING_TAG: &[u8] = b"FROST-secp256k1/rho";

/// BIP-340 convention: the point's y-coordinate is even.
pub fn is_y_even(point: &PublicKey) -> bool {
    point.serialize()[0] == 0x02
}

/// The point's x-coordinate is strictly below half the group order.
pub fn is_x_below_half_order(point: &PublicKey) -> bool {
    point.serialize()[1..33] < HALF_ORDER[..]
}

fn hash_to_scalar(engine: sha256::HashEngine) -> Result<Scalar, BridgeError> {
    let digest = sha256::Hash::from_engine(engine);
    Ok(Scalar::from_be_bytes(digest.to_byte_array())?)
}

/// Binding factor of one member for a message and the full commitment list.
pub fn binding_factor(
    node: &NodeId,
    message: &[u8],
    commitments: &BTreeMap<NodeId, PublicNonce>,
) -> Result<Scalar, BridgeError> {
    let mut engine = sha256::Hash::engine();
    engine.input(BINDING_TAG);
    engine.input(node.0.as_slice());
    engine.input(message);
    for (id, nonce) in commitments {
        engine.input(id.0.as_slice());
        engine.input(&nonce.d.serialize());
        engine.input(&nonce.e.serialize());
    }

    hash_to_scalar(engine)
}

/// Group commitment `R = sum(D_i + rho_i * E_i)` of a nonce selection.
pub fn aggregate_nonce(
    message: &[u8],
    commitments: &BTreeMap<NodeId, PublicNonce>,
) -> Result<PublicKey, BridgeError> {
    let mut parts = Vec::with_capacity(commitments.len());
    for (node, nonce) in commitments {
        let rho = binding_factor(node, message, commitments)?;
        let bound = nonce.e.mul_tweak(&SECP, &rho)?;
        parts.push(nonce.d.combine(&bound)?);
    }

    let refs: Vec<&PublicKey> = parts.iter().collect();
    Ok(PublicKey::combine_keys(&refs)?)
}

/// Sums partial signatures modulo the group order.
pub fn combine_partial_signatures(shares: &[[u8; 32]]) -> Result<[u8; 32], BridgeError> {
    let Some((first, rest)) = shares.split_first() else {
        return Err(eyre::eyre!("No partial signatures to combine").into());
    };

    let mut sum = SecretKey::from_slice(first)?;
    for share in rest {
        sum = sum.add_tweak(&Scalar::from_be_bytes(*share)?)?;
    }

    Ok(sum.secret_bytes())
}

/// `R.x || s`, the 64-byte BIP-340 signature encoding.
pub fn schnorr_signature_bytes(public_nonce: &PublicKey, signature: &[u8; 32]) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&public_nonce.serialize()[1..33]);
    bytes[32..].copy_from_slice(signature);
    bytes
}
