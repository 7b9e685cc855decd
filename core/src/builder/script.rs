//! # Script Builder
//!
//! Output scripts used by withdrawal transactions.

use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, PushBytes};
use bitcoin::{Amount, ScriptBuf, TxOut};

/// Creates an OP_RETURN output with the given data slice.
///
/// Does not check the standardness limit; data must be at most 80 bytes.
pub fn op_return_txout<S: AsRef<PushBytes>>(slice: S) -> TxOut {
    let script = Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(slice)
        .into_script();

    TxOut {
        value: Amount::ZERO,
        script_pubkey: script,
    }
}

pub fn payment_txout(value: u64, script_pubkey: ScriptBuf) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::script::PushBytesBuf;

    #[test]
    fn op_return_carries_payload() {
        let out = op_return_txout(PushBytesBuf::from([0xab_u8; 20]));
        assert!(out.script_pubkey.is_op_return());
        assert_eq!(out.value, Amount::ZERO);
        // OP_RETURN, push of 20 bytes, payload
        assert_eq!(out.script_pubkey.len(), 22);
        assert_eq!(&out.script_pubkey.as_bytes()[2..], &[0xab_u8; 20]);
    }
}
