//! # Settlement Contract Reader
//!
//! Resolves a burn transaction on the settlement chain to the withdrawal it
//! authorizes.

use crate::builder::address::p2wpkh_from_public_key;
use crate::errors::BridgeError;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, RootProvider};
use alloy::transports::http::reqwest::Url;
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Network, Txid};

sol! {
    #[derive(Debug)]
    event Burned(address burner, uint256 amount, bytes bitcoinAddress, bytes32 singleSpendTx);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnEvent {
    pub burner: Address,
    /// Amount to release, in satoshis.
    pub amount: u64,
    pub destination: bitcoin::Address,
    /// Its output 0 must be spent by the withdrawal, which makes every burn
    /// redeemable once.
    pub single_spend_txid: Txid,
}

#[async_trait]
pub trait SettlementReader: Send + Sync + std::fmt::Debug + 'static {
    async fn get_burn(&self, tx_hash: TxHash) -> Result<BurnEvent, BridgeError>;
}

fn burn_from_event(event: Burned, network: Network) -> Result<BurnEvent, BridgeError> {
    let amount = u64::try_from(event.amount).map_err(|_| {
        BridgeError::ValidationFailed(format!("burn amount {} does not fit in u64", event.amount))
    })?;

    Ok(BurnEvent {
        burner: event.burner,
        amount,
        destination: p2wpkh_from_public_key(&event.bitcoinAddress, network)?,
        single_spend_txid: Txid::from_byte_array(event.singleSpendTx.0),
    })
}

#[derive(Debug, Clone)]
pub struct AlloySettlementReader {
    provider: RootProvider,
    contract: Address,
    network: Network,
}

impl AlloySettlementReader {
    pub fn new(rpc_url: &str, contract: Address, network: Network) -> Result<Self, BridgeError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| BridgeError::ConfigError(format!("invalid RPC url {rpc_url}: {e}")))?;

        Ok(Self {
            provider: RootProvider::new_http(url),
            contract,
            network,
        })
    }
}

#[async_trait]
impl SettlementReader for AlloySettlementReader {
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn get_burn(&self, tx_hash: TxHash) -> Result<BurnEvent, BridgeError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(BridgeError::BurnNotFound(tx_hash))?;

        let event = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.contract)
            .find_map(|log| Burned::decode_log_data(log.data(), true).ok())
            .ok_or(BridgeError::BurnNotFound(tx_hash))?;

        burn_from_event(event, self.network)
    }
}
