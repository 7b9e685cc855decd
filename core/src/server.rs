//! # HTTP Action Surface
//!
//! Thin synchronous endpoints over the [`SigningOrchestrator`]. Every
//! failure is answered with `500 {"status": "error", "message": ...}`.

use crate::errors::BridgeError;
use crate::orchestrator::SigningOrchestrator;
use crate::signer::SignatureResult;
use alloy::primitives::TxHash;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MINT_PATH: &str = "/mint";
pub const SEND_PATH: &str = "/send";
pub const BURN_PATH: &str = "/burn";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    pub tx_hash: TxHash,
    pub bitcoin_wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    /// Amount in satoshis.
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnRequest {
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: String,
    pub tx_hash: Txid,
}

impl BroadcastResponse {
    fn success(tx_hash: Txid) -> Self {
        Self {
            status: "success".to_string(),
            tx_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                status: "error".to_string(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BridgeError> {
    payload
        .map(|Json(request)| request)
        .map_err(|e| eyre::eyre!("Invalid request body: {}", e.body_text()).into())
}

pub fn make_router(orchestrator: Arc<SigningOrchestrator>) -> Router {
    Router::new()
        .route(MINT_PATH, post(handle_mint))
        .route(SEND_PATH, post(handle_send))
        .route(BURN_PATH, post(handle_burn))
        .with_state(orchestrator)
}

/// Serves the action surface on `host:port` until the listener fails.
pub async fn run_server(
    host: &str,
    port: u16,
    orchestrator: Arc<SigningOrchestrator>,
) -> Result<(), BridgeError> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(BridgeError::ServerError)?;
    tracing::info!("Serving bridge actions on {host}:{port}");

    axum::serve(listener, make_router(orchestrator))
        .await
        .map_err(BridgeError::ServerError)
}

#[tracing::instrument(skip_all)]
async fn handle_mint(
    State(orchestrator): State<Arc<SigningOrchestrator>>,
    payload: Result<Json<MintRequest>, JsonRejection>,
) -> Result<Json<SignatureResult>, BridgeError> {
    let request = body(payload)?;
    tracing::info!("Mint requested for {}", request.tx_hash);

    Ok(Json(
        orchestrator
            .mint(request.tx_hash, &request.bitcoin_wallet)
            .await?,
    ))
}

#[tracing::instrument(skip_all)]
async fn handle_send(
    State(orchestrator): State<Arc<SigningOrchestrator>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, BridgeError> {
    let request = body(payload)?;
    tracing::info!("Send of {} sats to {} requested", request.amount, request.to);

    let txid = orchestrator.send(&request.to, request.amount).await?;
    Ok(Json(BroadcastResponse::success(txid)))
}

#[tracing::instrument(skip_all)]
async fn handle_burn(
    State(orchestrator): State<Arc<SigningOrchestrator>>,
    payload: Result<Json<BurnRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, BridgeError> {
    let request = body(payload)?;
    tracing::info!("Withdrawal for burn {} requested", request.tx_hash);

    let txid = orchestrator.burn(request.tx_hash).await?;
    Ok(Json(BroadcastResponse::success(txid)))
}
