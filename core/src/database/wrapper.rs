//! TEXT column codecs for chain primitives.

use crate::types::TransferStatus;
use alloy::primitives::{Address, TxHash, U256};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    Decode, Encode, Postgres,
};
use std::str::FromStr;

macro_rules! impl_text_column {
    ($wrapper:ident, $inner:ty, $encode:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $wrapper(pub $inner);

        impl sqlx::Type<Postgres> for $wrapper {
            fn type_info() -> PgTypeInfo {
                PgTypeInfo::with_name("TEXT")
            }
        }

        impl Encode<'_, Postgres> for $wrapper {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
                let s: String = $encode(&self.0);
                <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)
            }
        }

        impl<'r> Decode<'r, Postgres> for $wrapper {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <&str as Decode<Postgres>>::decode(value)?;
                Ok($wrapper(<$inner>::from_str(s)?))
            }
        }
    };
}

impl_text_column!(TxHashDB, TxHash, |v: &TxHash| v.to_string());
impl_text_column!(AddressDB, Address, |v: &Address| format!("{v:#x}"));
impl_text_column!(U256DB, U256, |v: &U256| v.to_string());
impl_text_column!(StatusDB, TransferStatus, |v: &TransferStatus| v
    .as_str()
    .to_string());

/// Canonical text form of a hash, as stored in the `tx_hash` column.
pub fn tx_hash_text(tx_hash: &TxHash) -> String {
    tx_hash.to_string()
}

/// Canonical text form of an address, as stored in address columns.
pub fn address_text(address: &Address) -> String {
    format!("{address:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_stored_lowercase() {
        let address = Address::from_str("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        assert_eq!(
            address_text(&address),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
        assert_eq!(Address::from_str(&address_text(&address)).unwrap(), address);
    }

    #[test]
    fn hashes_are_prefixed_hex() {
        let hash = TxHash::repeat_byte(0xab);
        let text = tx_hash_text(&hash);
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.len(), 66);
    }
}
