use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Txid};
use std::str::FromStr;
use std::time::Duration;

use super::types::{format_outpoint, BroadcastRequest, ErrorMessage, TxoResponse};
use super::{Broadcaster, Indexer, SubmitResponse, UtxoRecord};
use crate::error::WalletError;
use crate::keys::base64_encode;
use crate::ledger::AssetFilter;

/// Ordinals indexer and broadcast API over HTTP
pub struct HttpIndexer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndexer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_txos(&self, url: &str) -> Result<Vec<UtxoRecord>, WalletError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let txos: Vec<TxoResponse> = response
            .json()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        let total = txos.len();
        let records: Vec<UtxoRecord> = txos.into_iter().filter_map(TxoResponse::into_record).collect();
        if records.len() < total {
            log::warn!("Skipped {} unusable outputs from {}", total - records.len(), url);
        }
        Ok(records)
    }
}

#[async_trait]
impl Indexer for HttpIndexer {
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        filter: &AssetFilter,
    ) -> Result<Vec<UtxoRecord>, WalletError> {
        let url = match filter {
            AssetFilter::Token(id) => format!("{}/api/bsv20/{}/id/{}", self.base_url, address, id),
            AssetFilter::Locked => return self.get_locked_outputs(address).await,
            AssetFilter::Payment | AssetFilter::Ordinals => format!(
                "{}/api/txos/address/{}/unspent?limit=1500&offset=0&script=true",
                self.base_url, address
            ),
        };
        self.get_txos(&url).await
    }

    async fn get_locked_outputs(&self, address: &Address) -> Result<Vec<UtxoRecord>, WalletError> {
        let url = format!(
            "{}/api/locks/address/{}/unspent?limit=100&offset=0",
            self.base_url, address
        );
        self.get_txos(&url).await
    }

    async fn get_output_by_outpoint(&self, outpoint: &OutPoint) -> Result<Option<UtxoRecord>, WalletError> {
        let url = format!("{}/api/txos/{}?script=true", self.base_url, format_outpoint(outpoint));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let txo: TxoResponse = response
            .json()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;
        Ok(txo.into_record())
    }

    async fn get_spent_status(&self, outpoints: &[OutPoint]) -> Result<Vec<Option<Txid>>, WalletError> {
        let body: Vec<String> = outpoints.iter().map(format_outpoint).collect();
        let response = self
            .client
            .post(format!("{}/api/spends", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "spend lookup returned {}",
                response.status()
            )));
        }

        let spends: Vec<String> = response
            .json()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;
        if spends.len() != outpoints.len() {
            return Err(WalletError::Network(format!(
                "asked for {} spends, got {}",
                outpoints.len(),
                spends.len()
            )));
        }

        Ok(spends.iter().map(|s| Txid::from_str(s).ok()).collect())
    }

    async fn get_content_by_origin(&self, origin: &OutPoint) -> Result<Vec<u8>, WalletError> {
        let url = format!("{}/content/{}?fuzzy=false", self.base_url, format_outpoint(origin));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        Ok(response
            .bytes()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?
            .to_vec())
    }
}

#[async_trait]
impl Broadcaster for HttpIndexer {
    /// A connect failure means the transaction never left this host and is
    /// reported as `Network`. Anything after the request was sent that isn't
    /// a clear answer is `Indeterminate`.
    async fn submit_raw_transaction(&self, raw: &[u8]) -> Result<SubmitResponse, WalletError> {
        let response = self
            .client
            .post(format!("{}/api/tx", self.base_url))
            .json(&BroadcastRequest {
                rawtx: base64_encode(raw),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_builder() {
                    WalletError::Network(e.to_string())
                } else {
                    WalletError::Indeterminate(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WalletError::Indeterminate(e.to_string()))?;

        if status.is_success() {
            let txid = serde_json::from_str::<String>(&body)
                .ok()
                .and_then(|s| Txid::from_str(&s).ok())
                .ok_or_else(|| WalletError::Indeterminate(format!("unreadable broadcast reply: {}", body)))?;
            return Ok(SubmitResponse::Accepted(txid));
        }

        if status.is_client_error() {
            let message = serde_json::from_str::<ErrorMessage>(&body)
                .map(|m| m.message)
                .unwrap_or(body);
            return Ok(SubmitResponse::Rejected(message));
        }

        Err(WalletError::Indeterminate(format!("broadcast returned {}: {}", status, body)))
    }
}
