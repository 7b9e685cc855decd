//! # Watched Chain Access
//!
//! Read-only view of the EVM chain the observer and the finalizer poll.

use crate::errors::BridgeError;
use alloy::primitives::{Address, Bytes, TxHash, U64};
use alloy::providers::{Provider, RootProvider};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};

pub mod decoder;

/// The fields of a transaction the observer looks at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
}

#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug + 'static {
    async fn latest_block_number(&self) -> Result<u64, BridgeError>;

    /// Number of the newest block the node reports as finalized.
    async fn finalized_block_number(&self) -> Result<u64, BridgeError>;

    async fn block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>, BridgeError>;

    /// Hashes of the transactions the canonical block `number` contains.
    async fn block_tx_hashes(&self, number: u64) -> Result<Vec<TxHash>, BridgeError> {
        Ok(self
            .block_transactions(number)
            .await?
            .into_iter()
            .map(|tx| tx.hash)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RpcBlock<T> {
    number: U64,
    transactions: Vec<T>,
}

/// JSON-RPC client for the watched chain.
#[derive(Debug, Clone)]
pub struct EvmChainClient {
    provider: RootProvider,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, BridgeError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| BridgeError::ConfigError(format!("invalid RPC url {rpc_url}: {e}")))?;

        Ok(Self {
            provider: RootProvider::new_http(url),
        })
    }

    async fn get_block<T: DeserializeOwned + std::fmt::Debug + Send + Sync + Unpin + 'static>(
        &self,
        tag: String,
        full: bool,
    ) -> Result<RpcBlock<T>, BridgeError> {
        let block: Option<RpcBlock<T>> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (tag.clone(), full))
            .await?;

        block.ok_or_else(|| BridgeError::ChainRpc(format!("block {tag} is not available")))
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn latest_block_number(&self) -> Result<u64, BridgeError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn finalized_block_number(&self) -> Result<u64, BridgeError> {
        let block: RpcBlock<TxHash> = self.get_block("finalized".to_string(), false).await?;
        Ok(block.number.to::<u64>())
    }

    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>, BridgeError> {
        let block: RpcBlock<ChainTransaction> = self.get_block(format!("{number:#x}"), true).await?;
        Ok(block.transactions)
    }

    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn block_tx_hashes(&self, number: u64) -> Result<Vec<TxHash>, BridgeError> {
        let block: RpcBlock<TxHash> = self.get_block(format!("{number:#x}"), false).await?;
        Ok(block.transactions)
    }
}
