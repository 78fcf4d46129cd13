//! Network collaborators
//!
//! The ledger and broadcast coordinator talk to the outside world only
//! through these two ports. `HttpIndexer` implements both against an
//! ordinals indexer HTTP API.

mod http;
pub mod types;

pub use http::HttpIndexer;

use async_trait::async_trait;
use bitcoin::{Address, OutPoint, ScriptBuf, Txid};

use crate::error::WalletError;
use crate::ledger::{AssetFilter, Listing, LockMeta, OrdinalMeta};

/// An unspent output as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoRecord {
    pub outpoint: OutPoint,
    pub satoshis: u64,
    pub script: ScriptBuf,
    /// Present when the output carries an inscription
    pub ordinal: Option<OrdinalMeta>,
    /// Present for time-locked coins
    pub lock: Option<LockMeta>,
}

/// A listed ordinal as a buyer would see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketListing {
    pub outpoint: OutPoint,
    pub origin: OutPoint,
    pub listing: Listing,
    /// Full locking script of the listed output
    pub script: ScriptBuf,
}

/// Outcome of handing a raw transaction to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    Accepted(Txid),
    Rejected(String),
}

#[async_trait]
pub trait Indexer: Send + Sync {
    /// All unspent outputs at `address`, scoped by `filter`
    async fn get_unspent_outputs(
        &self,
        address: &Address,
        filter: &AssetFilter,
    ) -> Result<Vec<UtxoRecord>, WalletError>;

    /// Unspent time-locked coins at `address`
    async fn get_locked_outputs(&self, address: &Address) -> Result<Vec<UtxoRecord>, WalletError>;

    /// A single output by outpoint, spent or not; `None` when unknown
    async fn get_output_by_outpoint(&self, outpoint: &OutPoint) -> Result<Option<UtxoRecord>, WalletError>;

    /// Spending txid for each outpoint, in request order; `None` while unspent
    async fn get_spent_status(&self, outpoints: &[OutPoint]) -> Result<Vec<Option<Txid>>, WalletError>;

    /// Raw inscription content by origin outpoint
    async fn get_content_by_origin(&self, origin: &OutPoint) -> Result<Vec<u8>, WalletError>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit_raw_transaction(&self, raw: &[u8]) -> Result<SubmitResponse, WalletError>;
}
