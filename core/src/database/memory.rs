//! In-process [`TransferStore`] with the same semantics as the PostgreSQL one.

use super::{FinalityUpdate, TransferStore};
use crate::errors::BridgeError;
use crate::types::{ChainId, Transfer, TransferStatus, WatchedAddress};
use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    transfers: BTreeMap<(ChainId, TxHash), Transfer>,
    addresses: Vec<WatchedAddress>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn insert_transfers(&self, transfers: &[Transfer]) -> Result<u64, BridgeError> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for transfer in transfers {
            let key = (transfer.chain_id, transfer.tx_hash);
            if !state.transfers.contains_key(&key) {
                state.transfers.insert(key, transfer.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_transfer(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<Option<Transfer>, BridgeError> {
        Ok(self
            .state
            .lock()
            .await
            .transfers
            .get(&(chain_id, tx_hash))
            .cloned())
    }

    async fn transfers_by_status(
        &self,
        chain_id: ChainId,
        status: TransferStatus,
    ) -> Result<Vec<Transfer>, BridgeError> {
        let state = self.state.lock().await;
        let mut transfers: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.chain_id == chain_id && t.status == status)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.block_number);
        Ok(transfers)
    }

    async fn latest_observed_block(&self, chain_id: ChainId) -> Result<Option<u64>, BridgeError> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .values()
            .filter(|t| t.chain_id == chain_id)
            .map(|t| t.block_number)
            .max())
    }

    async fn pending_block_numbers(
        &self,
        chain_id: ChainId,
        up_to: u64,
    ) -> Result<Vec<u64>, BridgeError> {
        let state = self.state.lock().await;
        let blocks: BTreeSet<u64> = state
            .transfers
            .values()
            .filter(|t| {
                t.chain_id == chain_id
                    && t.status == TransferStatus::Pending
                    && t.block_number <= up_to
            })
            .map(|t| t.block_number)
            .collect();
        Ok(blocks.into_iter().collect())
    }

    async fn resolve_pending(
        &self,
        chain_id: ChainId,
        blocks: &[u64],
        canonical: &HashSet<TxHash>,
    ) -> Result<FinalityUpdate, BridgeError> {
        let mut state = self.state.lock().await;
        let mut update = FinalityUpdate::default();
        for transfer in state.transfers.values_mut().filter(|t| {
            t.chain_id == chain_id
                && t.status == TransferStatus::Pending
                && blocks.contains(&t.block_number)
        }) {
            if canonical.contains(&transfer.tx_hash) {
                transfer.status = TransferStatus::Finalized;
                update.finalized += 1;
            } else {
                transfer.status = TransferStatus::Reorg;
                update.reorged += 1;
            }
        }
        Ok(update)
    }

    async fn transition(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<bool, BridgeError> {
        if !from.can_transition_to(to) {
            return Err(BridgeError::UnexpectedTransferStatus {
                tx_hash,
                status: from,
                expected: to,
            });
        }

        let mut state = self.state.lock().await;
        match state.transfers.get_mut(&(chain_id, tx_hash)) {
            Some(transfer) if transfer.status == from => {
                transfer.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_transfer(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<bool, BridgeError> {
        Ok(self
            .state
            .lock()
            .await
            .transfers
            .remove(&(chain_id, tx_hash))
            .is_some())
    }

    async fn active_addresses(&self) -> Result<HashSet<Address>, BridgeError> {
        let state = self.state.lock().await;
        Ok(state
            .addresses
            .iter()
            .filter(|a| a.is_active)
            .map(|a| a.address)
            .collect())
    }

    async fn insert_watched_address(&self, watched: &WatchedAddress) -> Result<bool, BridgeError> {
        let mut state = self.state.lock().await;
        if state
            .addresses
            .iter()
            .any(|a| a.address == watched.address || a.user_id == watched.user_id)
        {
            return Ok(false);
        }
        state.addresses.push(watched.clone());
        Ok(true)
    }

    async fn deactivate_address(&self, address: Address) -> Result<bool, BridgeError> {
        let mut state = self.state.lock().await;
        match state.addresses.iter_mut().find(|a| a.address == address) {
            Some(watched) if watched.is_active => {
                watched.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn latest_user_id(&self) -> Result<Option<u64>, BridgeError> {
        Ok(self
            .state
            .lock()
            .await
            .addresses
            .iter()
            .map(|a| a.user_id)
            .max())
    }
}
