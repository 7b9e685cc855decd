//! # Finalizer
//!
//! Promotes `PENDING` transfers once the chain's finalized block has passed
//! them. A transfer whose hash is still in its canonical block becomes
//! `FINALIZED`, otherwise `REORG`.

use crate::chain::ChainClient;
use crate::database::{FinalityUpdate, TransferStore};
use crate::errors::BridgeError;
use crate::task::{Task, TaskVariant};
use crate::types::ChainId;
use alloy::primitives::TxHash;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug)]
pub struct Finalizer {
    chain_id: ChainId,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn TransferStore>,
    batch_size: usize,
}

impl Finalizer {
    pub fn new(
        chain_id: ChainId,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn TransferStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            chain_id,
            chain,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolves every pending transfer at or below the finalized block.
    pub async fn finalize(&self) -> Result<FinalityUpdate, BridgeError> {
        let finalized = self.chain.finalized_block_number().await?;
        let pending = self
            .store
            .pending_block_numbers(self.chain_id, finalized)
            .await?;

        if pending.is_empty() {
            tracing::debug!("No pending transfers at or below finalized block {finalized}");
            return Ok(FinalityUpdate::default());
        }

        let mut total = FinalityUpdate::default();
        for blocks in pending.chunks(self.batch_size) {
            let update = self.finalize_blocks(blocks).await?;
            total.finalized += update.finalized;
            total.reorged += update.reorged;
        }

        Ok(total)
    }

    /// Resolves the pending transfers of exactly `blocks`. The observer may
    /// insert into other blocks while this runs, so rows outside `blocks` are
    /// left for a later cycle.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN), ret(level = tracing::Level::DEBUG))]
    async fn finalize_blocks(&self, blocks: &[u64]) -> Result<FinalityUpdate, BridgeError> {
        let (Some(&from), Some(&to)) = (blocks.iter().min(), blocks.iter().max()) else {
            return Ok(FinalityUpdate::default());
        };

        let hashes = try_join_all(blocks.iter().map(|&number| self.chain.block_tx_hashes(number))).await?;
        let canonical: HashSet<TxHash> = hashes.into_iter().flatten().collect();

        let update = self
            .store
            .resolve_pending(self.chain_id, blocks, &canonical)
            .await?;
        if update.reorged > 0 {
            tracing::warn!(
                "{} transfers in blocks {from}..={to} are no longer canonical",
                update.reorged
            );
        }

        Ok(update)
    }
}

#[async_trait]
impl Task for Finalizer {
    type Output = bool;
    const VARIANT: TaskVariant = TaskVariant::Finalizer;

    async fn run_once(&mut self) -> Result<Self::Output, BridgeError> {
        let update = self.finalize().await?;
        Ok(update.finalized + update.reorged > 0)
    }
}
