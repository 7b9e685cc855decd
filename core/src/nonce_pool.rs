//! # Nonce Pool
//!
//! Per-member reservoir of single-use signing nonces. A record leaves the
//! pool the moment it is selected and is never put back, whether the round
//! that uses it succeeds or not.

use crate::errors::BridgeError;
use crate::frost::{aggregate_nonce, is_y_even};
use crate::registry::OperatorInfo;
use crate::signer::SigningNetwork;
use crate::types::{KeyPurpose, NodeId, NonceRecord, PublicNonce};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

type Queues = HashMap<(NodeId, KeyPurpose), VecDeque<NonceRecord>>;

#[derive(Debug)]
pub struct NoncePool {
    network: Arc<dyn SigningNetwork>,
    queues: Mutex<Queues>,
    max_attempts: usize,
    request_timeout: Duration,
}

impl NoncePool {
    pub fn new(network: Arc<dyn SigningNetwork>, max_attempts: usize) -> Self {
        Self {
            network,
            queues: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            request_timeout: Duration::from_secs(50),
        }
    }

    /// Bounds how long a single member may take to answer a nonce request.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Requests `count` nonces from every member concurrently and queues
    /// them under `purpose`. Members that answered keep their nonces even
    /// when others failed.
    #[tracing::instrument(skip(self, committee), fields(members = committee.len()), err(level = tracing::Level::ERROR))]
    pub async fn allocate(
        &self,
        committee: &[OperatorInfo],
        purpose: KeyPurpose,
        count: usize,
    ) -> Result<BTreeMap<NodeId, Vec<NonceRecord>>, BridgeError> {
        let responses = join_all(committee.iter().map(|node| async move {
            let response = timeout(self.request_timeout, self.network.request_nonces(node, count))
                .await
                .unwrap_or(Err(BridgeError::RoundTimeout(self.request_timeout)));
            (node.node_id, response)
        }))
        .await;

        let mut allocated = BTreeMap::new();
        let mut failed = Vec::new();
        {
            let mut queues = self.queues.lock().await;
            for (node, response) in responses {
                match response {
                    Ok(nonces) => {
                        queues
                            .entry((node, purpose))
                            .or_default()
                            .extend(nonces.iter().cloned());
                        allocated.insert(node, nonces);
                    }
                    Err(e) => {
                        tracing::warn!("Nonce allocation from {node} failed: {e}");
                        failed.push(node);
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(BridgeError::NonceAllocationFailed(failed));
        }

        Ok(allocated)
    }

    pub async fn available(&self, node: &NodeId, purpose: KeyPurpose) -> usize {
        self.queues
            .lock()
            .await
            .get(&(*node, purpose))
            .map_or(0, VecDeque::len)
    }

    /// Pops one record per member.
    ///
    /// For [`KeyPurpose::BtcCustody`] the aggregate nonce over `digest` must
    /// have an even y-coordinate. Selections that fail the check are
    /// discarded and a fresh one is drawn, at most `max_attempts` times.
    pub async fn select(
        &self,
        committee: &[NodeId],
        purpose: KeyPurpose,
        digest: &[u8],
    ) -> Result<BTreeMap<NodeId, NonceRecord>, BridgeError> {
        for attempt in 0..self.max_attempts {
            let selection = self.pop_selection(committee, purpose).await?;

            if purpose == KeyPurpose::EthAttestation {
                return Ok(selection);
            }

            let commitments: BTreeMap<NodeId, PublicNonce> = selection
                .iter()
                .map(|(node, record)| (*node, record.public_part))
                .collect();
            if is_y_even(&aggregate_nonce(digest, &commitments)?) {
                return Ok(selection);
            }
            tracing::debug!("Discarding nonce selection with odd aggregate, attempt {attempt}");
        }

        Err(BridgeError::NonceParityExhausted(self.max_attempts))
    }

    /// Atomically removes the front record of every member's queue. Nothing
    /// is removed when any member has run out.
    async fn pop_selection(
        &self,
        committee: &[NodeId],
        purpose: KeyPurpose,
    ) -> Result<BTreeMap<NodeId, NonceRecord>, BridgeError> {
        let mut queues = self.queues.lock().await;

        if let Some(empty) = committee.iter().find(|node| {
            queues
                .get(&(**node, purpose))
                .is_none_or(VecDeque::is_empty)
        }) {
            return Err(BridgeError::InsufficientNonces {
                node: *empty,
                purpose,
            });
        }

        let mut selection = BTreeMap::new();
        for node in committee {
            if let Some(record) = queues
                .get_mut(&(*node, purpose))
                .and_then(VecDeque::pop_front)
            {
                selection.insert(*node, record);
            }
        }

        Ok(selection)
    }
}
