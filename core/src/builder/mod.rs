//! # Builders
//!
//! Builds the Bitcoin withdrawal transactions the committee signs and the
//! mint attestation message for the EVM side.

pub mod address;
pub mod mint;
pub mod script;
pub mod sighash;
pub mod withdrawal;

pub use mint::build_mint_message;
pub use withdrawal::{TaprootTransactionBuilder, TransactionBuilder, UnsignedWithdrawal};
