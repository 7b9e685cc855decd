//! # Bitcoin Wallet Backend
//!
//! UTXO lookup and transaction broadcast for the custody address, backed by
//! an Esplora-compatible REST API.

use crate::errors::BridgeError;
use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Address, Transaction, Txid};
use serde::{Deserialize, Serialize};

/// An unspent output of the custody address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Amount in satoshis.
    pub value: u64,
}

#[async_trait]
pub trait BitcoinWallet: Send + Sync + std::fmt::Debug + 'static {
    async fn list_utxos(&self, address: &Address) -> Result<Vec<Utxo>, BridgeError>;

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BridgeError>;

    /// Unspent outputs of `address` covering at least `min_amount` sats.
    async fn utxos(&self, address: &Address, min_amount: u64) -> Result<Vec<Utxo>, BridgeError> {
        let available = self.list_utxos(address).await?;
        select_utxos(address, &available, min_amount)
    }
}

#[derive(Debug, Clone)]
pub struct EsploraWallet {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraWallet {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BitcoinWallet for EsploraWallet {
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn list_utxos(&self, address: &Address) -> Result<Vec<Utxo>, BridgeError> {
        let utxos: Vec<Utxo> = self
            .client
            .get(format!("{}/address/{address}/utxo", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(utxos)
    }

    #[tracing::instrument(skip(self, tx), fields(txid = %tx.compute_txid()), err(level = tracing::Level::ERROR))]
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BridgeError> {
        let response = self
            .client
            .post(format!("{}/tx", self.base_url))
            .body(serialize_hex(tx))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BridgeError::Wallet(format!(
                "broadcast rejected with {status}: {body}"
            )));
        }

        Ok(body.trim().parse::<Txid>()?)
    }
}

/// Greedy selection, largest outputs first, until `target` is covered.
pub fn select_utxos(
    address: &Address,
    utxos: &[Utxo],
    target: u64,
) -> Result<Vec<Utxo>, BridgeError> {
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value).then(a.txid.cmp(&b.txid)));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in sorted {
        if total >= target {
            break;
        }
        total = total
            .checked_add(utxo.value)
            .ok_or_else(|| BridgeError::ValidationFailed("UTXO values overflow".into()))?;
        selected.push(utxo);
    }

    if total < target {
        return Err(BridgeError::InsufficientFunds {
            address: address.to_string(),
            needed: target,
            available: total,
        });
    }

    Ok(selected)
}
