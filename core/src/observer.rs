//! # Chain Observer
//!
//! Scans the watched chain block by block for ERC20 transfers into deposit
//! addresses and records them as `PENDING`.

use crate::chain::decoder::decode_transfer;
use crate::chain::ChainClient;
use crate::database::TransferStore;
use crate::errors::BridgeError;
use crate::provisioner::AddressProvisioner;
use crate::task::{Task, TaskVariant};
use crate::types::{ChainId, Transfer};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Splits `[from, to]` into consecutive, non-overlapping inclusive ranges of
/// at most `size` blocks.
pub fn block_batches(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut batches = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        batches.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    batches
}

#[derive(Debug)]
pub struct ChainObserver {
    chain_id: ChainId,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn TransferStore>,
    provisioner: Option<AddressProvisioner>,
    batch_size: u64,
    min_batch_duration: Duration,
    /// Next block to scan. Loaded from the store on the first iteration.
    next_block: Option<u64>,
}

impl ChainObserver {
    pub fn new(
        chain_id: ChainId,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn TransferStore>,
        batch_size: u64,
        min_batch_duration: Duration,
    ) -> Self {
        Self {
            chain_id,
            chain,
            store,
            provisioner: None,
            batch_size,
            min_batch_duration,
            next_block: None,
        }
    }

    pub fn with_provisioner(mut self, provisioner: AddressProvisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// Fetches every block of the batch concurrently and stores the
    /// transfers that pay a watched address.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN), ret(level = tracing::Level::TRACE))]
    async fn observe_batch(&self, start: u64, end: u64) -> Result<u64, BridgeError> {
        let watched = self.store.active_addresses().await?;

        let blocks = try_join_all((start..=end).map(|number| {
            let chain = self.chain.clone();
            async move { Ok::<_, BridgeError>((number, chain.block_transactions(number).await?)) }
        }))
        .await?;

        let transfers: Vec<Transfer> = blocks
            .into_iter()
            .flat_map(|(number, txs)| {
                txs.into_iter().filter_map(move |tx| {
                    decode_transfer(&tx).map(|decoded| (number, tx.hash, decoded))
                })
            })
            .filter(|(_, _, decoded)| watched.contains(&decoded.recipient))
            .map(|(number, hash, decoded)| {
                Transfer::pending(
                    self.chain_id,
                    hash,
                    decoded.token,
                    decoded.recipient,
                    decoded.amount,
                    number,
                )
            })
            .collect();

        let inserted = self.store.insert_transfers(&transfers).await?;
        if inserted > 0 {
            tracing::info!("Observed {inserted} new transfers in blocks {start}..={end}");
        }

        Ok(inserted)
    }
}

#[async_trait]
impl Task for ChainObserver {
    type Output = bool;
    const VARIANT: TaskVariant = TaskVariant::ChainObserver;

    async fn run_once(&mut self) -> Result<Self::Output, BridgeError> {
        if let Some(provisioner) = &self.provisioner {
            if let Err(e) = provisioner.sync().await {
                tracing::warn!("Deposit address provisioning failed, continuing with known addresses: {e}");
            }
        }

        let head = self.chain.latest_block_number().await?;
        let next = match self.next_block {
            Some(next) => next,
            None => self
                .store
                .latest_observed_block(self.chain_id)
                .await?
                .unwrap_or(head),
        };
        self.next_block = Some(next);

        if next > head {
            return Ok(false);
        }

        for (start, end) in block_batches(next, head, self.batch_size) {
            let started = Instant::now();
            self.observe_batch(start, end).await?;
            self.next_block = Some(end + 1);

            let elapsed = started.elapsed();
            if elapsed < self.min_batch_duration {
                sleep(self.min_batch_duration - elapsed).await;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::test_utils::{erc20_transfer, watch, MockChain, CHAIN_ID};
    use crate::types::TransferStatus;
    use alloy::primitives::{Address, TxHash, U256};

    fn observer(chain: Arc<MockChain>, store: Arc<MemoryStore>) -> ChainObserver {
        ChainObserver::new(CHAIN_ID, chain, store, 3, Duration::from_secs(10))
    }

    #[test]
    fn batches_cover_range_without_overlap() {
        assert_eq!(block_batches(10, 16, 3), vec![(10, 12), (13, 15), (16, 16)]);
        assert_eq!(block_batches(5, 5, 3), vec![(5, 5)]);
        assert!(block_batches(6, 5, 3).is_empty());
        assert_eq!(block_batches(0, 2, 0), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn records_transfers_to_watched_addresses() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let watched = Address::repeat_byte(0xd1);
        watch(&*store, 1, watched).await;

        chain.set_head(99);
        let mut observer = observer(chain.clone(), store.clone());
        // Cold start begins at the head.
        assert!(observer.run_once().await.unwrap());
        assert_eq!(observer.next_block(), Some(100));

        chain.push_tx(100, erc20_transfer(1, watched, 5_000));
        chain.push_tx(100, erc20_transfer(2, Address::repeat_byte(0x99), 1));
        chain.push_tx(101, erc20_transfer(3, watched, 7));
        chain.set_head(104);

        assert!(observer.run_once().await.unwrap());
        assert_eq!(observer.next_block(), Some(105));

        let pending = store
            .transfers_by_status(CHAIN_ID, TransferStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].tx_hash, TxHash::repeat_byte(1));
        assert_eq!(pending[0].block_number, 100);
        assert_eq!(pending[0].value, U256::from(5_000));
        assert_eq!(pending[1].block_number, 101);

        // Head unchanged: nothing to do.
        assert!(!observer.run_once().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn each_batch_takes_at_least_the_minimum_duration() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        chain.set_head(10);

        let mut observer = observer(chain.clone(), store);
        observer.run_once().await.unwrap();

        // Blocks 11..=16 are two batches.
        chain.set_head(16);
        let started = Instant::now();
        observer.run_once().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_stored_watermark() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let watched = Address::repeat_byte(0xd1);
        watch(&*store, 1, watched).await;

        store
            .insert_transfers(&[Transfer::pending(
                CHAIN_ID,
                TxHash::repeat_byte(1),
                Address::repeat_byte(0xee),
                watched,
                U256::from(1),
                50,
            )])
            .await
            .unwrap();
        chain.push_tx(51, erc20_transfer(2, watched, 1));
        chain.set_head(52);

        let mut observer = observer(chain, store.clone());
        observer.run_once().await.unwrap();
        assert_eq!(observer.next_block(), Some(53));
        assert!(store
            .get_transfer(CHAIN_ID, TxHash::repeat_byte(2))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_watermark() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        chain.set_head(10);
        let mut observer = observer(chain.clone(), store);
        observer.run_once().await.unwrap();

        chain.set_head(12);
        chain.set_failing(true);
        let err = observer.run_once().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(observer.next_block(), Some(11));
    }
}
