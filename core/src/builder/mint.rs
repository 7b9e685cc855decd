//! Attestation message for minting wrapped BTC on the EVM side.

use alloy::primitives::{keccak256, Address, TxHash, B256, U256};
use alloy_sol_types::SolValue;

/// `keccak256(abi.encodePacked(uint256(tx_hash), uint256(amount), address(to)))`
pub fn build_mint_message(tx_hash: TxHash, amount: U256, to: Address) -> B256 {
    let tx = U256::from_be_bytes(tx_hash.0);
    keccak256((tx, amount, to).abi_encode_packed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_is_32_32_20() {
        let tx_hash = TxHash::repeat_byte(0x11);
        let amount = U256::from(100_000u64);
        let to = Address::repeat_byte(0x22);

        let mut packed = Vec::with_capacity(84);
        packed.extend_from_slice(tx_hash.as_slice());
        packed.extend_from_slice(&amount.to_be_bytes::<32>());
        packed.extend_from_slice(to.as_slice());

        assert_eq!(build_mint_message(tx_hash, amount, to), keccak256(&packed));
    }

    #[test]
    fn every_field_is_bound() {
        let base = build_mint_message(TxHash::repeat_byte(1), U256::from(5), Address::repeat_byte(2));
        assert_ne!(base, build_mint_message(TxHash::repeat_byte(3), U256::from(5), Address::repeat_byte(2)));
        assert_ne!(base, build_mint_message(TxHash::repeat_byte(1), U256::from(6), Address::repeat_byte(2)));
        assert_ne!(base, build_mint_message(TxHash::repeat_byte(1), U256::from(5), Address::repeat_byte(4)));
    }
}
