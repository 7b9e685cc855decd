//! # Threshold Keys
//!
//! [`KeyStore`] holds at most one active [`SigningKey`] per [`KeyPurpose`].
//! [`KeyLifecycleManager`] produces them through distributed key generation,
//! rerunning generation until the group key is normalized for its purpose.

use crate::errors::BridgeError;
use crate::frost::{is_x_below_half_order, is_y_even};
use crate::registry::{OperatorInfo, OperatorRegistry};
use crate::signer::SigningNetwork;
use crate::types::{unix_now, KeyPurpose, SigningKey};
use bitcoin::secp256k1::PublicKey;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

/// Whether `key` satisfies the parity convention of `purpose`: even y for
/// Taproot custody keys, x below half the group order for attestation keys.
pub fn is_normalized(purpose: KeyPurpose, key: &PublicKey) -> bool {
    match purpose {
        KeyPurpose::BtcCustody => is_y_even(key),
        KeyPurpose::EthAttestation => is_x_below_half_order(key),
    }
}

/// Active keys, authoritative in memory. The backing JSON file is read once
/// on load and rewritten on every change.
#[derive(Debug, Default)]
pub struct KeyStore {
    path: Option<PathBuf>,
    keys: RwLock<BTreeMap<KeyPurpose, SigningKey>>,
}

impl KeyStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads keys from `path`. A missing file is an empty store.
    pub fn load(path: PathBuf) -> Result<Self, BridgeError> {
        let keys = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Loaded {} keys from {}", keys.len(), path.display());

        Ok(Self {
            path: Some(path),
            keys: RwLock::new(keys),
        })
    }

    pub async fn get(&self, purpose: KeyPurpose) -> Result<SigningKey, BridgeError> {
        self.keys
            .read()
            .await
            .get(&purpose)
            .cloned()
            .ok_or(BridgeError::KeyNotFound(purpose))
    }

    pub async fn active(&self) -> Vec<SigningKey> {
        self.keys.read().await.values().cloned().collect()
    }

    /// Makes `key` the active key of its purpose, dropping the previous one.
    pub async fn set(&self, key: SigningKey) -> Result<(), BridgeError> {
        let mut keys = self.keys.write().await;
        let mut updated = keys.clone();
        let previous = updated.insert(key.purpose, key);

        // Memory only changes once the file has the new key.
        if let Some(path) = &self.path {
            tokio::fs::write(path, serde_json::to_vec_pretty(&updated)?).await?;
        }
        if let Some(previous) = previous {
            tracing::info!("Superseding {} key {}", previous.purpose, previous.key_id);
        }
        *keys = updated;

        Ok(())
    }
}

#[derive(Debug)]
pub struct KeyLifecycleManager {
    registry: Arc<OperatorRegistry>,
    network: Arc<dyn SigningNetwork>,
    store: Arc<KeyStore>,
    max_attempts: usize,
    liveness_timeout: Duration,
    dkg_timeout: Duration,
}

impl KeyLifecycleManager {
    pub fn new(
        registry: Arc<OperatorRegistry>,
        network: Arc<dyn SigningNetwork>,
        store: Arc<KeyStore>,
        max_attempts: usize,
    ) -> Self {
        Self {
            registry,
            network,
            store,
            max_attempts: max_attempts.max(1),
            liveness_timeout: Duration::from_secs(5),
            dkg_timeout: Duration::from_secs(50),
        }
    }

    /// Bounds the liveness probe per member and each key generation run.
    pub fn with_timeouts(mut self, liveness: Duration, dkg: Duration) -> Self {
        self.liveness_timeout = liveness;
        self.dkg_timeout = dkg;
        self
    }

    /// Members that answer a single nonce request within the liveness
    /// timeout.
    pub async fn live_members(&self, candidates: &[OperatorInfo]) -> Vec<OperatorInfo> {
        let probes = join_all(candidates.iter().map(|node| async move {
            match timeout(self.liveness_timeout, self.network.request_nonces(node, 1)).await {
                Ok(Ok(_)) => Some(node.clone()),
                Ok(Err(e)) => {
                    tracing::warn!("Node {} failed the liveness probe: {e}", node.node_id);
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        "Node {} did not answer the liveness probe within {:?}",
                        node.node_id,
                        self.liveness_timeout
                    );
                    None
                }
            }
        }))
        .await;

        probes.into_iter().flatten().collect()
    }

    /// Generates and stores a new key for `purpose` among the first
    /// `committee_size` registry members that are live.
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR), ret(level = tracing::Level::TRACE))]
    pub async fn generate(
        &self,
        threshold: usize,
        purpose: KeyPurpose,
        committee_size: Option<usize>,
    ) -> Result<SigningKey, BridgeError> {
        if threshold == 0 {
            return Err(BridgeError::ConfigError("threshold must be positive".into()));
        }

        let candidates = self
            .registry
            .lookup_all(&self.registry.members(committee_size).await)
            .await?;
        let party = self.live_members(&candidates).await;
        if party.len() < threshold {
            return Err(BridgeError::NotEnoughLiveNodes {
                live: party.len(),
                threshold,
            });
        }

        for attempt in 1..=self.max_attempts {
            let dkg = timeout(
                self.dkg_timeout,
                self.network.request_dkg(threshold, &party, purpose),
            )
            .await
            .map_err(|_| BridgeError::RoundTimeout(self.dkg_timeout))??;
            if !is_normalized(purpose, &dkg.public_key) {
                tracing::debug!("Discarding {purpose} key {} on attempt {attempt}", dkg.key_id);
                continue;
            }

            let key = SigningKey {
                key_id: dkg.key_id,
                purpose,
                public_key: dkg.public_key,
                committee: dkg.party,
                threshold,
                created_at: unix_now(),
            };
            self.store.set(key.clone()).await?;
            tracing::info!("Generated {purpose} key {} after {attempt} attempts", key.key_id);

            return Ok(key);
        }

        Err(BridgeError::KeyParityExhausted(purpose, self.max_attempts))
    }
}
