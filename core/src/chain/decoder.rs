//! ERC20 call decoding for observed transactions.

use super::ChainTransaction;
use alloy::primitives::{Address, U256};
use alloy_sol_types::{sol, SolInterface};

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTransfer {
    /// Contract the call was sent to.
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
}

/// Decodes `transfer` and `transferFrom` calls. Anything else, including
/// contract creations and plain value transfers, yields `None`.
pub fn decode_transfer(tx: &ChainTransaction) -> Option<DecodedTransfer> {
    let token = tx.to?;
    let call = IERC20::IERC20Calls::abi_decode(&tx.input, true).ok()?;

    let (recipient, amount) = match call {
        IERC20::IERC20Calls::transfer(call) => (call.to, call.amount),
        IERC20::IERC20Calls::transferFrom(call) => (call.to, call.amount),
    };

    Some(DecodedTransfer {
        token,
        recipient,
        amount,
    })
}
