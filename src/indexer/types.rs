//! Indexer API wire types
//!
//! Outputs are addressed as `"<txid>_<vout>"` and scripts travel as base64.

use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::UtxoRecord;
use crate::keys::base64_decode;
use crate::ledger::{Listing, LockMeta, OrdinalMeta, TokenMeta};

/// Output record from `/api/txos/...` and `/api/bsv20/...`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxoResponse {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub outpoint: String,
    pub satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TxoData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginResponse {
    pub outpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TxoData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxoData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insc: Option<InscriptionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsv20: Option<Bsv20Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InscriptionData {
    pub file: FileData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileData {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListData {
    pub price: u64,
    /// Base64 payout script
    pub payout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bsv20Data {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<String>,
    pub amt: String,
}

/// Time lock on coins from `/api/locks/...`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockData {
    /// Block height the coins unlock at
    pub until: u32,
}

/// Body of `POST /api/tx`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub rawtx: String,
}

/// Error body returned by the indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

pub fn format_outpoint(outpoint: &OutPoint) -> String {
    format!("{}_{}", outpoint.txid, outpoint.vout)
}

pub fn parse_outpoint(s: &str) -> Option<OutPoint> {
    let (txid, vout) = s.split_once('_')?;
    Some(OutPoint::new(Txid::from_str(txid).ok()?, vout.parse().ok()?))
}

impl TxoResponse {
    /// Convert to a ledger-facing record. Records without a script are
    /// unusable for signing and yield `None`.
    pub fn into_record(self) -> Option<UtxoRecord> {
        let txid = Txid::from_str(&self.txid).ok()?;
        let script = ScriptBuf::from_bytes(base64_decode(self.script.as_deref()?)?);

        let data = self.data.unwrap_or_default();
        let ordinal = self.origin.and_then(|origin| {
            let origin_data = origin.data.unwrap_or_default();
            Some(OrdinalMeta {
                origin: parse_outpoint(&origin.outpoint)?,
                content_type: origin_data
                    .insc
                    .or(data.insc.clone())
                    .map(|i| i.file.content_type),
                listing: data.list.as_ref().and_then(|l| {
                    Some(Listing {
                        price: l.price,
                        payout: ScriptBuf::from_bytes(base64_decode(&l.payout)?),
                    })
                }),
                token: data.bsv20.as_ref().and_then(|t| {
                    Some(TokenMeta {
                        id: t.id.clone().or_else(|| t.tick.clone())?,
                        amount: t.amt.parse().ok()?,
                    })
                }),
            })
        });

        let lock = data.lock.as_ref().map(|l| LockMeta { until: l.until });

        Some(UtxoRecord {
            outpoint: OutPoint::new(txid, self.vout),
            satoshis: self.satoshis,
            script,
            ordinal,
            lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ordinal_txo() {
        let txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let body = json!({
            "txid": txid,
            "vout": 0,
            "outpoint": format!("{}_0", txid),
            "satoshis": 1,
            "script": "dqkUqGBbkQxPNqDnvmMyk7/JtqBCqJ2IrA==",
            "origin": {
                "outpoint": format!("{}_0", txid),
                "data": { "insc": { "file": { "type": "panda/tag", "size": 120 } } }
            },
            "data": { "bsv20": { "id": "abc_0", "amt": "1000" } }
        });

        let txo: TxoResponse = serde_json::from_value(body).unwrap();
        let record = txo.into_record().unwrap();
        let meta = record.ordinal.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("panda/tag"));
        assert_eq!(meta.token.unwrap().amount, 1000);
        assert_eq!(record.script.len(), 25);
    }

    #[test]
    fn test_parse_locked_txo() {
        let txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let body = json!({
            "txid": txid,
            "vout": 1,
            "satoshis": 5000,
            "script": "dqkUqGBbkQxPNqDnvmMyk7/JtqBCqJ2IrA==",
            "data": { "lock": { "until": 900000 } }
        });

        let record = serde_json::from_value::<TxoResponse>(body)
            .unwrap()
            .into_record()
            .unwrap();
        assert!(record.ordinal.is_none());
        assert_eq!(record.lock, Some(LockMeta { until: 900_000 }));
    }

    #[test]
    fn test_outpoint_format() {
        let outpoint = parse_outpoint(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b_3",
        )
        .unwrap();
        assert_eq!(outpoint.vout, 3);
        assert_eq!(parse_outpoint(&format_outpoint(&outpoint)), Some(outpoint));
        assert!(parse_outpoint("nope").is_none());
    }

    #[test]
    fn test_missing_script_is_skipped() {
        let txo = TxoResponse {
            txid: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b".into(),
            vout: 0,
            satoshis: 10,
            ..Default::default()
        };
        assert!(txo.into_record().is_none());
    }
}
