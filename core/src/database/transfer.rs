//! # Transfer Related Database Operations
//!
//! PostgreSQL implementation of [`TransferStore`] for the `transfers` table.
//! Watched-address queries live in the `address` module.

use super::wrapper::{address_text, tx_hash_text, AddressDB, StatusDB, TxHashDB, U256DB};
use super::{Database, FinalityUpdate, TransferStore};
use crate::errors::BridgeError;
use crate::types::{ChainId, Transfer, TransferStatus, WatchedAddress};
use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use sqlx::QueryBuilder;
use std::collections::HashSet;

#[derive(sqlx::FromRow)]
struct TransferRow {
    chain_id: i64,
    tx_hash: TxHashDB,
    value: U256DB,
    token_address: AddressDB,
    destination_address: AddressDB,
    block_number: i64,
    observed_at: i64,
    status: StatusDB,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            tx_hash: row.tx_hash.0,
            chain_id: row.chain_id as u64,
            value: row.value.0,
            token_address: row.token_address.0,
            destination_address: row.destination_address.0,
            block_number: row.block_number as u64,
            observed_at: row.observed_at as u64,
            status: row.status.0,
        }
    }
}

const TRANSFER_COLUMNS: &str = "chain_id, tx_hash, value, token_address, destination_address, block_number, observed_at, status";

#[async_trait]
impl TransferStore for Database {
    #[tracing::instrument(skip(self, transfers), err(level = tracing::Level::ERROR), ret(level = tracing::Level::TRACE))]
    async fn insert_transfers(&self, transfers: &[Transfer]) -> Result<u64, BridgeError> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut query_builder = QueryBuilder::new(format!("INSERT INTO transfers ({TRANSFER_COLUMNS}) "));
        query_builder.push_values(transfers, |mut row, transfer| {
            row.push_bind(transfer.chain_id as i64)
                .push_bind(TxHashDB(transfer.tx_hash))
                .push_bind(U256DB(transfer.value))
                .push_bind(AddressDB(transfer.token_address))
                .push_bind(AddressDB(transfer.destination_address))
                .push_bind(transfer.block_number as i64)
                .push_bind(transfer.observed_at as i64)
                .push_bind(StatusDB(transfer.status));
        });
        query_builder.push(" ON CONFLICT (chain_id, tx_hash) DO NOTHING");

        let result = query_builder.build().execute(&self.connection).await?;

        Ok(result.rows_affected())
    }

    async fn get_transfer(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<Option<Transfer>, BridgeError> {
        let row: Option<TransferRow> = sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE chain_id = $1 AND tx_hash = $2"
        ))
        .bind(chain_id as i64)
        .bind(TxHashDB(tx_hash))
        .fetch_optional(&self.connection)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn transfers_by_status(
        &self,
        chain_id: ChainId,
        status: TransferStatus,
    ) -> Result<Vec<Transfer>, BridgeError> {
        let rows: Vec<TransferRow> = sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE chain_id = $1 AND status = $2 ORDER BY block_number"
        ))
        .bind(chain_id as i64)
        .bind(StatusDB(status))
        .fetch_all(&self.connection)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_observed_block(&self, chain_id: ChainId) -> Result<Option<u64>, BridgeError> {
        let (block,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(block_number) FROM transfers WHERE chain_id = $1")
                .bind(chain_id as i64)
                .fetch_one(&self.connection)
                .await?;

        Ok(block.map(|b| b as u64))
    }

    async fn pending_block_numbers(
        &self,
        chain_id: ChainId,
        up_to: u64,
    ) -> Result<Vec<u64>, BridgeError> {
        let blocks: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT block_number FROM transfers
             WHERE chain_id = $1 AND status = 'PENDING' AND block_number <= $2
             ORDER BY block_number",
        )
        .bind(chain_id as i64)
        .bind(up_to as i64)
        .fetch_all(&self.connection)
        .await?;

        Ok(blocks.into_iter().map(|(b,)| b as u64).collect())
    }

    #[tracing::instrument(skip(self, canonical), err(level = tracing::Level::ERROR), ret(level = tracing::Level::TRACE))]
    async fn resolve_pending(
        &self,
        chain_id: ChainId,
        blocks: &[u64],
        canonical: &HashSet<TxHash>,
    ) -> Result<FinalityUpdate, BridgeError> {
        let blocks: Vec<i64> = blocks.iter().map(|&number| number as i64).collect();
        let canonical: Vec<String> = canonical.iter().map(tx_hash_text).collect();
        let mut dbtx = self.connection.begin().await?;

        let finalized = sqlx::query(
            "UPDATE transfers SET status = 'FINALIZED'
             WHERE chain_id = $1 AND status = 'PENDING'
               AND block_number = ANY($2)
               AND tx_hash = ANY($3)",
        )
        .bind(chain_id as i64)
        .bind(&blocks)
        .bind(&canonical)
        .execute(&mut *dbtx)
        .await?
        .rows_affected();

        let reorged = sqlx::query(
            "UPDATE transfers SET status = 'REORG'
             WHERE chain_id = $1 AND status = 'PENDING'
               AND block_number = ANY($2)
               AND tx_hash <> ALL($3)",
        )
        .bind(chain_id as i64)
        .bind(&blocks)
        .bind(&canonical)
        .execute(&mut *dbtx)
        .await?
        .rows_affected();

        dbtx.commit().await?;

        Ok(FinalityUpdate {
            finalized,
            reorged,
        })
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

        let result = sqlx::query(
            "UPDATE transfers SET status = $4 WHERE chain_id = $1 AND tx_hash = $2 AND status = $3",
        )
        .bind(chain_id as i64)
        .bind(TxHashDB(tx_hash))
        .bind(StatusDB(from))
        .bind(StatusDB(to))
        .execute(&self.connection)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_transfer(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<bool, BridgeError> {
        let result = sqlx::query("DELETE FROM transfers WHERE chain_id = $1 AND tx_hash = $2")
            .bind(chain_id as i64)
            .bind(TxHashDB(tx_hash))
            .execute(&self.connection)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn active_addresses(&self) -> Result<HashSet<Address>, BridgeError> {
        self.get_active_addresses().await
    }

    async fn insert_watched_address(&self, watched: &WatchedAddress) -> Result<bool, BridgeError> {
        self.save_watched_address(watched).await
    }

    async fn deactivate_address(&self, address: Address) -> Result<bool, BridgeError> {
        let result = sqlx::query("UPDATE watched_addresses SET is_active = FALSE WHERE address = $1")
            .bind(address_text(&address))
            .execute(&self.connection)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_user_id(&self) -> Result<Option<u64>, BridgeError> {
        self.get_latest_user_id().await
    }
}
