//! # Operator Registry
//!
//! Local view of the committee members published by the operator subgraph.
//! The view is replaced wholesale on every successful refresh; a failed
//! refresh leaves the previous view in place.

use crate::errors::BridgeError;
use crate::task::{Task, TaskVariant};
use crate::types::NodeId;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A committee member as advertised by the operator feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub node_id: NodeId,
    pub address: Address,
    /// Base URL of the node's signing endpoints, e.g. `http://10.0.0.7:5037`.
    pub socket: String,
    pub stake: U256,
    /// Public share of the node, used by the node to authenticate traffic.
    pub public_key: PublicKey,
}

#[async_trait]
pub trait OperatorFeed: Send + Sync + std::fmt::Debug + 'static {
    async fn fetch_operators(&self) -> Result<Vec<OperatorInfo>, BridgeError>;
}

#[derive(Debug, Default)]
struct RegistryView {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, OperatorInfo>,
}

#[derive(Debug)]
pub struct OperatorRegistry {
    feed: Arc<dyn OperatorFeed>,
    view: RwLock<RegistryView>,
}

impl OperatorRegistry {
    pub fn new(feed: Arc<dyn OperatorFeed>) -> Self {
        Self {
            feed,
            view: RwLock::new(RegistryView::default()),
        }
    }

    /// Pulls the operator list and swaps it in. Returns the member count.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    pub async fn refresh(&self) -> Result<usize, BridgeError> {
        let operators = self.feed.fetch_operators().await?;
        if operators.is_empty() {
            tracing::warn!("Operator feed returned no operators");
        }

        let mut view = RegistryView::default();
        for operator in operators {
            if view.nodes.contains_key(&operator.node_id) {
                continue;
            }
            view.order.push(operator.node_id);
            view.nodes.insert(operator.node_id, operator);
        }

        let count = view.order.len();
        *self.view.write().await = view;
        tracing::debug!("Operator registry holds {count} members");

        Ok(count)
    }

    /// Node ids in feed order, truncated to `limit` when given.
    pub async fn members(&self, limit: Option<usize>) -> Vec<NodeId> {
        let view = self.view.read().await;
        let take = limit.unwrap_or(view.order.len());
        view.order.iter().take(take).copied().collect()
    }

    pub async fn lookup(&self, node: &NodeId) -> Option<OperatorInfo> {
        self.view.read().await.nodes.get(node).cloned()
    }

    /// Resolves every node, failing on the first one the registry does not know.
    pub async fn lookup_all(&self, nodes: &[NodeId]) -> Result<Vec<OperatorInfo>, BridgeError> {
        let view = self.view.read().await;
        nodes
            .iter()
            .map(|node| {
                view.nodes
                    .get(node)
                    .cloned()
                    .ok_or(BridgeError::UnknownNode(*node))
            })
            .collect()
    }
}

/// Periodic registry refresh.
#[derive(Debug)]
pub struct RegistrySyncTask {
    registry: Arc<OperatorRegistry>,
}

impl RegistrySyncTask {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Task for RegistrySyncTask {
    type Output = bool;
    const VARIANT: TaskVariant = TaskVariant::RegistrySync;

    async fn run_once(&mut self) -> Result<Self::Output, BridgeError> {
        self.registry.refresh().await?;
        // Always wait the full refresh interval.
        Ok(false)
    }
}

const OPERATORS_QUERY: &str =
    "{ operators(where: { registered: true }) { id operatorId socket stake } }";

#[derive(Debug, Deserialize)]
struct SubgraphResponse {
    data: Option<SubgraphData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SubgraphData {
    operators: Vec<SubgraphOperator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphOperator {
    id: Address,
    #[allow(dead_code)]
    operator_id: Option<String>,
    socket: String,
    stake: String,
}

/// Operator feed backed by a GraphQL subgraph plus a public key list that is
/// read from a local JSON file or fetched over HTTP.
#[derive(Debug, Clone)]
pub struct SubgraphFeed {
    client: reqwest::Client,
    subgraph_url: String,
    public_keys_source: String,
}

impl SubgraphFeed {
    pub fn new(subgraph_url: String, public_keys_source: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            subgraph_url,
            public_keys_source,
        }
    }

    async fn load_public_keys(&self) -> Result<HashMap<Address, PublicKey>, BridgeError> {
        let raw: HashMap<String, String> = if self.public_keys_source.starts_with("http://")
            || self.public_keys_source.starts_with("https://")
        {
            self.client
                .get(&self.public_keys_source)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?
        } else {
            let contents = tokio::fs::read_to_string(Path::new(&self.public_keys_source)).await?;
            serde_json::from_str(&contents)?
        };

        parse_public_keys(raw)
    }
}

fn parse_public_keys(raw: HashMap<String, String>) -> Result<HashMap<Address, PublicKey>, BridgeError> {
    raw.into_iter()
        .map(|(address, key)| {
            let address = Address::from_str(&address)
                .map_err(|e| BridgeError::Registry(format!("bad operator address {address}: {e}")))?;
            let key = PublicKey::from_slice(&hex::decode(key.trim_start_matches("0x"))?)?;
            Ok((address, key))
        })
        .collect()
}

fn operators_from_response(
    response: SubgraphResponse,
    public_keys: &HashMap<Address, PublicKey>,
) -> Result<Vec<OperatorInfo>, BridgeError> {
    if !response.errors.is_empty() {
        return Err(BridgeError::Registry(format!(
            "subgraph returned errors: {:?}",
            response.errors
        )));
    }
    let data = response
        .data
        .ok_or_else(|| BridgeError::Registry("subgraph response has no data".into()))?;

    let mut operators = Vec::with_capacity(data.operators.len());
    for operator in data.operators {
        let Some(public_key) = public_keys.get(&operator.id) else {
            tracing::warn!("No public key published for operator {}, skipping", operator.id);
            continue;
        };
        let stake = U256::from_str(&operator.stake)
            .map_err(|e| BridgeError::Registry(format!("bad stake {}: {e}", operator.stake)))?;
        let socket = if operator.socket.contains("://") {
            operator.socket
        } else {
            format!("http://{}", operator.socket)
        };

        operators.push(OperatorInfo {
            node_id: NodeId::from_operator(&operator.id),
            address: operator.id,
            socket,
            stake,
            public_key: *public_key,
        });
    }

    Ok(operators)
}

#[async_trait]
impl OperatorFeed for SubgraphFeed {
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn fetch_operators(&self) -> Result<Vec<OperatorInfo>, BridgeError> {
        let public_keys = self.load_public_keys().await?;
        let response: SubgraphResponse = self
            .client
            .post(&self.subgraph_url)
            .json(&serde_json::json!({ "query": OPERATORS_QUERY }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        operators_from_response(response, &public_keys)
    }
}
