//! # Withdrawal Transactions
//!
//! Unsigned transactions spending the custody address, together with the
//! per-input digests the committee has to sign. Members rebuild the same
//! transaction from a sign request, so construction must be deterministic in
//! its inputs.

use super::script::{op_return_txout, payment_txout};
use super::sighash::key_spend_sighashes;
use crate::constants::DUST_LIMIT_SATS;
use crate::errors::BridgeError;
use crate::wallet::Utxo;
use bitcoin::absolute::LockTime;
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{Address, OutPoint, ScriptBuf, Sequence, TapSighash, Transaction, TxIn, TxOut, Witness};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedWithdrawal {
    pub tx: Transaction,
    pub prevouts: Vec<TxOut>,
    /// Key-spend digest of each input, in input order.
    pub sighashes: Vec<TapSighash>,
}

/// Arguments of a burn-backed withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnWithdrawal<'a> {
    pub to: &'a Address,
    pub amount: u64,
    pub fee: u64,
    /// Outpoint that makes the burn spendable exactly once.
    pub single_spend: OutPoint,
    /// EVM address of the burner, committed in an OP_RETURN output.
    pub burner: [u8; 20],
}

pub trait TransactionBuilder: Send + Sync + std::fmt::Debug + 'static {
    /// Pays `amount` to `to` from `utxos` of `from`, leaving `fee` to miners.
    fn build_withdrawal(
        &self,
        from: &Address,
        utxos: &[Utxo],
        to: &Address,
        amount: u64,
        fee: u64,
    ) -> Result<UnsignedWithdrawal, BridgeError>;

    /// Like [`TransactionBuilder::build_withdrawal`], but the single-spend
    /// outpoint of the burn is input 0 and the burner is committed on chain.
    fn build_burn_withdrawal(
        &self,
        from: &Address,
        utxos: &[Utxo],
        burn: &BurnWithdrawal<'_>,
    ) -> Result<UnsignedWithdrawal, BridgeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaprootTransactionBuilder;

impl TaprootTransactionBuilder {
    fn assemble(
        from: &Address,
        utxos: &[Utxo],
        mut outputs: Vec<TxOut>,
        amount: u64,
        fee: u64,
    ) -> Result<UnsignedWithdrawal, BridgeError> {
        if utxos.is_empty() {
            return Err(BridgeError::ValidationFailed(
                "withdrawal has no inputs".into(),
            ));
        }

        let total_in = utxos
            .iter()
            .try_fold(0u64, |total, utxo| total.checked_add(utxo.value))
            .ok_or_else(|| BridgeError::ValidationFailed("input values overflow".into()))?;
        let needed = amount
            .checked_add(fee)
            .ok_or_else(|| BridgeError::ValidationFailed("amount plus fee overflows".into()))?;
        let change = total_in
            .checked_sub(needed)
            .ok_or_else(|| BridgeError::InsufficientFunds {
                address: from.to_string(),
                needed,
                available: total_in,
            })?;
        if change >= DUST_LIMIT_SATS {
            outputs.push(payment_txout(change, from.script_pubkey()));
        }

        let input = utxos
            .iter()
            .map(|utxo| TxIn {
                previous_output: OutPoint::new(utxo.txid, utxo.vout),
                script_sig: ScriptBuf::default(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();
        let prevouts: Vec<TxOut> = utxos
            .iter()
            .map(|utxo| payment_txout(utxo.value, from.script_pubkey()))
            .collect();

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: outputs,
        };
        let sighashes = key_spend_sighashes(&tx, &prevouts)?;

        Ok(UnsignedWithdrawal {
            tx,
            prevouts,
            sighashes,
        })
    }
}

impl TransactionBuilder for TaprootTransactionBuilder {
    fn build_withdrawal(
        &self,
        from: &Address,
        utxos: &[Utxo],
        to: &Address,
        amount: u64,
        fee: u64,
    ) -> Result<UnsignedWithdrawal, BridgeError> {
        let outputs = vec![payment_txout(amount, to.script_pubkey())];
        Self::assemble(from, utxos, outputs, amount, fee)
    }

    fn build_burn_withdrawal(
        &self,
        from: &Address,
        utxos: &[Utxo],
        burn: &BurnWithdrawal<'_>,
    ) -> Result<UnsignedWithdrawal, BridgeError> {
        let Some(first) = utxos.first() else {
            return Err(BridgeError::ValidationFailed(
                "burn withdrawal has no inputs".into(),
            ));
        };
        if OutPoint::new(first.txid, first.vout) != burn.single_spend {
            return Err(BridgeError::ValidationFailed(format!(
                "input 0 is {}:{}, expected single-spend outpoint {}",
                first.txid, first.vout, burn.single_spend
            )));
        }

        let outputs = vec![
            payment_txout(burn.amount, burn.to.script_pubkey()),
            op_return_txout(PushBytesBuf::from(burn.burner)),
        ];
        Self::assemble(from, utxos, outputs, burn.amount, burn.fee)
    }
}
