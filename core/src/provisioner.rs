//! # Deposit Address Provisioning
//!
//! Every user gets a deterministic deposit address on the watched chain. The
//! provisioner asks the user service for the newest user id and registers
//! the CREATE2 addresses of all users the store has not seen yet.

use crate::database::TransferStore;
use crate::errors::BridgeError;
use crate::types::WatchedAddress;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait UserFeed: Send + Sync + std::fmt::Debug + 'static {
    async fn latest_user_id(&self) -> Result<u64, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct HttpUserFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn parse_latest_id(body: &serde_json::Value) -> Option<u64> {
    body.as_u64().or_else(|| {
        ["latest_id", "id"]
            .iter()
            .find_map(|field| body.get(field).and_then(serde_json::Value::as_u64))
    })
}

#[async_trait]
impl UserFeed for HttpUserFeed {
    async fn latest_user_id(&self) -> Result<u64, BridgeError> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/users/latest-id", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_latest_id(&body).ok_or_else(|| {
            BridgeError::Registry(format!("unexpected latest user id response: {body}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct AddressProvisioner {
    store: Arc<dyn TransferStore>,
    feed: Arc<dyn UserFeed>,
    factory: Address,
    init_code_hash: B256,
}

impl AddressProvisioner {
    pub fn new(
        store: Arc<dyn TransferStore>,
        feed: Arc<dyn UserFeed>,
        factory: Address,
        init_code_hash: B256,
    ) -> Self {
        Self {
            store,
            feed,
            factory,
            init_code_hash,
        }
    }

    /// `CREATE2(factory, uint256(user_id), init_code_hash)`
    pub fn deposit_address(&self, user_id: u64) -> Address {
        let salt = U256::from(user_id).to_be_bytes::<32>();
        self.factory.create2(salt, self.init_code_hash.0)
    }

    /// Registers addresses for users newer than the newest stored one.
    /// Returns how many were added.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN), ret(level = tracing::Level::TRACE))]
    pub async fn sync(&self) -> Result<usize, BridgeError> {
        let remote = self.feed.latest_user_id().await?;
        let first = match self.store.latest_user_id().await? {
            Some(local) if local >= remote => return Ok(0),
            Some(local) => local + 1,
            None => 0,
        };

        let mut added = 0;
        for user_id in first..=remote {
            let watched = WatchedAddress {
                user_id,
                address: self.deposit_address(user_id),
                is_active: true,
            };
            if self.store.insert_watched_address(&watched).await? {
                added += 1;
            }
        }

        if added > 0 {
            tracing::info!("Provisioned {added} deposit addresses up to user {remote}");
        }

        Ok(added)
    }
}
