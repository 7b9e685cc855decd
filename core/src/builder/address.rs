//! Addresses of the custody key and of withdrawal recipients.

use crate::errors::BridgeError;
use bitcoin::key::{CompressedPublicKey, TweakedPublicKey};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Network};

/// Key-path-only taproot address whose output key is `key` itself.
///
/// There is no taproot tweak: group signatures are produced over the raw
/// aggregate key, so the key must have an even y-coordinate to be spendable.
pub fn custody_address(key: &PublicKey, network: Network) -> Address {
    let (xonly, _) = key.x_only_public_key();
    Address::p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(xonly), network)
}

/// P2WPKH address of a compressed public key given as raw bytes.
pub fn p2wpkh_from_public_key(bytes: &[u8], network: Network) -> Result<Address, BridgeError> {
    if bytes.len() != 33 {
        return Err(BridgeError::ValidationFailed(format!(
            "expected a 33-byte compressed public key, got {} bytes",
            bytes.len()
        )));
    }
    let key = CompressedPublicKey::from_slice(bytes)?;
    Ok(Address::p2wpkh(&key, network))
}
