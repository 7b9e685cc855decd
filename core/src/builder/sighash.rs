//! Key-path taproot sighashes for every input of a transaction.

use crate::errors::BridgeError;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::{TapSighash, TapSighashType, Transaction, TxOut};

/// One `TapSighashType::Default` key-spend digest per input, in input order.
pub fn key_spend_sighashes(
    tx: &Transaction,
    prevouts: &[TxOut],
) -> Result<Vec<TapSighash>, BridgeError> {
    let mut sighash_cache = SighashCache::new(tx);
    let prevouts = Prevouts::All(prevouts);

    (0..tx.input.len())
        .map(|index| {
            Ok(sighash_cache.taproot_key_spend_signature_hash(
                index,
                &prevouts,
                TapSighashType::Default,
            )?)
        })
        .collect()
}
