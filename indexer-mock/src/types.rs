//! Indexer API response types
//!
//! These types match the indexer JSON format so clients can consume them
//! transparently. Outputs are addressed as `"<txid>_<vout>"`, scripts and raw
//! transactions travel as base64.

use serde::{Deserialize, Serialize};

/// Output record from /api/txos/address/{address}/unspent and /api/bsv20/...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxoResponse {
    pub txid: String,
    pub vout: u32,
    pub outpoint: String,
    pub satoshis: u64,
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TxoData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginResponse {
    pub outpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TxoData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insc: Option<InscriptionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<ListData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsv20: Option<Bsv20Data>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InscriptionData {
    pub file: FileData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileData {
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListData {
    pub price: u64,
    pub payout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bsv20Data {
    pub id: String,
    pub amt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockData {
    pub until: u32,
}

/// Body of POST /api/tx
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub rawtx: String,
}

/// Error body for 4xx and 5xx replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

// ============================================================================
// MOCK HELPER TYPES (not part of the indexer API)
// ============================================================================

/// Body of POST /mock/fund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRequest {
    pub address: String,
    pub satoshis: u64,
}

/// Body of POST /mock/inscribe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InscribeRequest {
    pub address: String,
    pub content_type: String,
    /// Base64 content
    pub content: String,
    #[serde(default)]
    pub bsv20: Option<Bsv20Data>,
}

/// Body of POST /mock/lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub address: String,
    pub satoshis: u64,
    pub until: u32,
}

/// Reply of the funding helpers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutpointResponse {
    pub outpoint: String,
}

/// Body of POST /mock/broadcast-mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum BroadcastModeRequest {
    Accept,
    Reject { message: String },
    Drop,
    Lost,
    Hang,
}
