//! Axum HTTP handlers for the indexer API endpoints

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::time::Duration;

use crate::state::{format_outpoint, parse_outpoint, BroadcastMode, SharedState, StateError};
use crate::types::*;

/// Custom error type for handlers
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorMessage { message })).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// GET /api/txos/address/{address}/unspent
/// Returns every unspent output owned by an address
pub async fn get_unspent(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Json<Vec<TxoResponse>> {
    Json(state.read().await.unspent_for(&address))
}

/// GET /api/locks/address/{address}/unspent
/// Returns the unspent time-locked coins of an address
pub async fn get_locked(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Json<Vec<TxoResponse>> {
    Json(state.read().await.locks_for(&address))
}

/// GET /api/txos/{txid_vout}
pub async fn get_output(
    State(state): State<SharedState>,
    Path(outpoint): Path<String>,
) -> Result<Json<TxoResponse>, ApiError> {
    let parsed =
        parse_outpoint(&outpoint).ok_or_else(|| ApiError::BadRequest(format!("Invalid outpoint: {}", outpoint)))?;
    state
        .read()
        .await
        .output(&parsed)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown output {}", outpoint)))
}

/// GET /api/bsv20/{address}/id/{id}
/// Returns the unspent token outputs of one token id
pub async fn get_token_outputs(
    State(state): State<SharedState>,
    Path((address, id)): Path<(String, String)>,
) -> Json<Vec<TxoResponse>> {
    Json(state.read().await.tokens_for(&address, &id))
}

/// POST /api/spends
/// Spending txid per outpoint, empty string when unspent
pub async fn post_spends(
    State(state): State<SharedState>,
    Json(outpoints): Json<Vec<String>>,
) -> Json<Vec<String>> {
    Json(state.read().await.spends(&outpoints))
}

/// GET /content/{txid_vout}
/// Returns the raw content of an inscription by origin
pub async fn get_content(
    State(state): State<SharedState>,
    Path(origin): Path<String>,
) -> Result<Response, ApiError> {
    let outpoint =
        parse_outpoint(&origin).ok_or_else(|| ApiError::BadRequest(format!("Invalid outpoint: {}", origin)))?;
    let (content_type, content) = state
        .read()
        .await
        .content(&outpoint)
        .ok_or_else(|| ApiError::NotFound(format!("No inscription at {}", origin)))?;

    Ok(([(header::CONTENT_TYPE, content_type)], content).into_response())
}

/// POST /api/tx
/// Broadcasts a raw transaction (base64 in JSON body)
/// Returns the txid as a JSON string
pub async fn broadcast_transaction(
    State(state): State<SharedState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<String>, ApiError> {
    let raw = STANDARD
        .decode(req.rawtx.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("rawtx is not base64: {}", e)))?;

    let mode = state.read().await.mode();
    match mode {
        BroadcastMode::Accept => {
            let txid = state.write().await.accept(&raw)?;
            Ok(Json(txid.to_string()))
        }
        BroadcastMode::Reject(message) => Err(ApiError::BadRequest(message)),
        BroadcastMode::Drop => Err(ApiError::Internal("upstream node unavailable".into())),
        BroadcastMode::Lost => {
            let txid = state.write().await.accept(&raw)?;
            log::info!("Dropping reply for accepted {}", txid);
            Err(ApiError::Internal("upstream node unavailable".into()))
        }
        BroadcastMode::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ApiError::Internal("gave up".into()))
        }
    }
}

// ============================================================================
// MOCK HELPER ENDPOINTS (not part of the indexer API)
// ============================================================================

/// POST /mock/fund
/// Credit a plain output to an address
pub async fn fund(
    State(state): State<SharedState>,
    Json(req): Json<FundRequest>,
) -> Result<Json<OutpointResponse>, ApiError> {
    let outpoint = state.write().await.fund(&req.address, req.satoshis)?;
    Ok(Json(OutpointResponse {
        outpoint: format_outpoint(&outpoint),
    }))
}

/// POST /mock/lock
/// Credit time-locked coins to an address
pub async fn lock_coins(
    State(state): State<SharedState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<OutpointResponse>, ApiError> {
    let outpoint = state.write().await.lock(&req.address, req.satoshis, req.until)?;
    Ok(Json(OutpointResponse {
        outpoint: format_outpoint(&outpoint),
    }))
}

/// POST /mock/inscribe
/// Create a 1-sat inscription owned by an address
pub async fn inscribe(
    State(state): State<SharedState>,
    Json(req): Json<InscribeRequest>,
) -> Result<Json<OutpointResponse>, ApiError> {
    let content = STANDARD
        .decode(req.content.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("content is not base64: {}", e)))?;
    let outpoint = state
        .write()
        .await
        .inscribe(&req.address, &req.content_type, content, req.bsv20)?;
    Ok(Json(OutpointResponse {
        outpoint: format_outpoint(&outpoint),
    }))
}

/// POST /mock/broadcast-mode
/// Choose how the next broadcasts are answered
pub async fn set_broadcast_mode(
    State(state): State<SharedState>,
    Json(req): Json<BroadcastModeRequest>,
) -> StatusCode {
    let mode = match req {
        BroadcastModeRequest::Accept => BroadcastMode::Accept,
        BroadcastModeRequest::Reject { message } => BroadcastMode::Reject(message),
        BroadcastModeRequest::Drop => BroadcastMode::Drop,
        BroadcastModeRequest::Lost => BroadcastMode::Lost,
        BroadcastModeRequest::Hang => BroadcastMode::Hang,
    };
    state.write().await.set_mode(mode);
    StatusCode::NO_CONTENT
}

/// GET /mock/tx/{txid}
/// Returns an accepted transaction as hex
pub async fn get_transaction_hex(
    State(state): State<SharedState>,
    Path(txid): Path<String>,
) -> Result<String, ApiError> {
    let parsed = txid
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid txid: {}", txid)))?;
    state
        .read()
        .await
        .raw_transaction(&parsed)
        .map(hex::encode)
        .ok_or_else(|| ApiError::NotFound(format!("Transaction not found: {}", txid)))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}
