//! HTTP client for the signing nodes' `/pyfrost/v1` endpoints.

use super::{DkgResult, SignRequest, SignStatus, SigningNetwork};
use crate::constants::{
    DKG_ROUND1_PATH, DKG_ROUND2_PATH, DKG_ROUND3_PATH, GENERATE_NONCES_PATH, SIGN_PATH,
};
use crate::errors::BridgeError;
use crate::registry::OperatorInfo;
use crate::types::{KeyPurpose, NodeId, NonceRecord};
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct NonceRequest {
    number_of_nonces: usize,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    status: SignStatus,
    #[serde(default)]
    nonces: Vec<NonceRecord>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    status: SignStatus,
    signature: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Round1Request<'a> {
    dkg_id: &'a str,
    party: &'a [NodeId],
    threshold: usize,
    key_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct Round1Response {
    status: SignStatus,
    broadcast: Option<serde_json::Value>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Round2Request<'a> {
    dkg_id: &'a str,
    broadcasted_data: &'a BTreeMap<NodeId, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Round2Response {
    status: SignStatus,
    /// Private messages keyed by receiver.
    #[serde(default)]
    send_data: BTreeMap<NodeId, serde_json::Value>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Round3Request<'a> {
    dkg_id: &'a str,
    /// Private messages for this node keyed by sender.
    send_data: BTreeMap<NodeId, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Round3Response {
    status: SignStatus,
    dkg_public_key: Option<PublicKey>,
    message: Option<String>,
}

fn ensure_success(
    node: &OperatorInfo,
    status: SignStatus,
    message: Option<String>,
) -> Result<(), BridgeError> {
    let message = message.unwrap_or_default();
    match status {
        SignStatus::Successful => Ok(()),
        SignStatus::Rejected => Err(BridgeError::ValidationFailed(format!(
            "node {} rejected the request: {message}",
            node.node_id
        ))),
        SignStatus::Error => Err(BridgeError::SignerFailed(node.node_id, message)),
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpSigningNetwork {
    client: reqwest::Client,
}

impl HttpSigningNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that gives up on any single node request after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        node: &OperatorInfo,
        path: &str,
        body: &B,
    ) -> Result<R, BridgeError> {
        let url = format!("{}{path}", node.socket.trim_end_matches('/'));
        let failed = |e: reqwest::Error| BridgeError::SignerFailed(node.node_id, e.to_string());

        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?
            .json()
            .await
            .map_err(failed)
    }
}

#[async_trait]
impl SigningNetwork for HttpSigningNetwork {
    #[tracing::instrument(skip(self, node), fields(node = %node.node_id), err(level = tracing::Level::WARN))]
    async fn request_nonces(
        &self,
        node: &OperatorInfo,
        count: usize,
    ) -> Result<Vec<NonceRecord>, BridgeError> {
        let response: NonceResponse = self
            .post(node, GENERATE_NONCES_PATH, &NonceRequest {
                number_of_nonces: count,
            })
            .await?;
        ensure_success(node, response.status, response.message)?;

        Ok(response.nonces)
    }

    #[tracing::instrument(skip(self, node, request), fields(node = %node.node_id), err(level = tracing::Level::WARN))]
    async fn request_partial_signature(
        &self,
        node: &OperatorInfo,
        request: &SignRequest,
    ) -> Result<[u8; 32], BridgeError> {
        let response: SignResponse = self.post(node, SIGN_PATH, request).await?;
        ensure_success(node, response.status, response.message)?;

        let share = response
            .signature
            .ok_or_else(|| BridgeError::SignerFailed(node.node_id, "missing signature".into()))?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(share.trim_start_matches("0x"), &mut bytes)
            .map_err(|e| BridgeError::SignerFailed(node.node_id, format!("bad signature: {e}")))?;

        Ok(bytes)
    }

    #[tracing::instrument(skip(self, party), err(level = tracing::Level::ERROR))]
    async fn request_dkg(
        &self,
        threshold: usize,
        party: &[OperatorInfo],
        purpose: KeyPurpose,
    ) -> Result<DkgResult, BridgeError> {
        let dkg_id = hex::encode(bitcoin::secp256k1::rand::random::<[u8; 16]>());
        let ids: Vec<NodeId> = party.iter().map(|node| node.node_id).collect();

        let round1 = try_join_all(party.iter().map(|node| async {
            let response: Round1Response = self
                .post(node, DKG_ROUND1_PATH, &Round1Request {
                    dkg_id: &dkg_id,
                    party: &ids,
                    threshold,
                    key_type: purpose.key_type(),
                })
                .await?;
            ensure_success(node, response.status, response.message)?;
            let broadcast = response
                .broadcast
                .ok_or_else(|| BridgeError::DkgFailed(format!("node {} sent no broadcast", node.node_id)))?;
            Ok::<_, BridgeError>((node.node_id, broadcast))
        }))
        .await?;
        let broadcasted_data: BTreeMap<NodeId, serde_json::Value> = round1.into_iter().collect();

        let round2 = try_join_all(party.iter().map(|node| async {
            let response: Round2Response = self
                .post(node, DKG_ROUND2_PATH, &Round2Request {
                    dkg_id: &dkg_id,
                    broadcasted_data: &broadcasted_data,
                })
                .await?;
            ensure_success(node, response.status, response.message)?;
            Ok::<_, BridgeError>((node.node_id, response.send_data))
        }))
        .await?;

        let round3 = try_join_all(party.iter().map(|node| {
            let inbox: BTreeMap<NodeId, serde_json::Value> = round2
                .iter()
                .filter_map(|(sender, outbox)| {
                    outbox.get(&node.node_id).map(|data| (*sender, data.clone()))
                })
                .collect();
            let dkg_id = &dkg_id;
            async move {
                let response: Round3Response = self
                    .post(node, DKG_ROUND3_PATH, &Round3Request {
                        dkg_id,
                        send_data: inbox,
                    })
                    .await?;
                ensure_success(node, response.status, response.message)?;
                response.dkg_public_key.ok_or_else(|| {
                    BridgeError::DkgFailed(format!("node {} sent no public key", node.node_id))
                })
            }
        }))
        .await?;

        let Some(public_key) = round3.first().copied() else {
            return Err(BridgeError::DkgFailed("empty party".into()));
        };
        if round3.iter().any(|key| *key != public_key) {
            return Err(BridgeError::DkgFailed(
                "members disagree on the group public key".into(),
            ));
        }

        Ok(DkgResult {
            key_id: dkg_id,
            public_key,
            party: ids,
        })
    }
}
