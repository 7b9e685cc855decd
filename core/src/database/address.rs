//! # Watched Address Related Database Operations

use super::wrapper::{address_text, AddressDB};
use super::Database;
use crate::errors::BridgeError;
use crate::types::WatchedAddress;
use alloy::primitives::Address;
use std::collections::HashSet;

impl Database {
    pub async fn get_active_addresses(&self) -> Result<HashSet<Address>, BridgeError> {
        let rows: Vec<(AddressDB,)> =
            sqlx::query_as("SELECT address FROM watched_addresses WHERE is_active")
                .fetch_all(&self.connection)
                .await?;

        Ok(rows.into_iter().map(|(address,)| address.0).collect())
    }

    /// Saves a watched address. Returns false if the user id or the address is
    /// already present.
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR), ret(level = tracing::Level::TRACE))]
    pub async fn save_watched_address(&self, watched: &WatchedAddress) -> Result<bool, BridgeError> {
        let result = sqlx::query(
            "INSERT INTO watched_addresses (user_id, address, is_active) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(watched.user_id as i64)
        .bind(address_text(&watched.address))
        .bind(watched.is_active)
        .execute(&self.connection)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_latest_user_id(&self) -> Result<Option<u64>, BridgeError> {
        let (user_id,): (Option<i64>,) = sqlx::query_as("SELECT MAX(user_id) FROM watched_addresses")
            .fetch_one(&self.connection)
            .await?;

        Ok(user_id.map(|id| id as u64))
    }
}
