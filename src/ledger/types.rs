use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::keys::KeyRef;

/// Sale terms of a listed ordinal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub price: u64,
    pub payout: ScriptBuf,
}

/// Fungible token amount carried by an inscribed output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub id: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalMeta {
    /// Outpoint of the inscription's first appearance
    pub origin: OutPoint,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub listing: Option<Listing>,
    #[serde(default)]
    pub token: Option<TokenMeta>,
}

/// Coins time-locked until a block height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub until: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetKind {
    Payment,
    Ordinal(OrdinalMeta),
    Locked(LockMeta),
}

/// Which slice of the ledger an operation applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetFilter {
    Payment,
    Ordinals,
    /// Ordinals carrying the given fungible token
    Token(String),
    /// Time-locked coins, never spendable as payment
    Locked,
}

impl AssetFilter {
    pub fn matches(&self, asset: &AssetKind) -> bool {
        match (self, asset) {
            (AssetFilter::Payment, AssetKind::Payment) => true,
            (AssetFilter::Ordinals, AssetKind::Ordinal(_)) => true,
            (AssetFilter::Locked, AssetKind::Locked(_)) => true,
            (AssetFilter::Token(id), AssetKind::Ordinal(meta)) => {
                meta.token.as_ref().is_some_and(|t| &t.id == id)
            }
            _ => false,
        }
    }
}

/// An output the wallet owns, tracked locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub satoshis: u64,
    pub script: ScriptBuf,
    pub spent: bool,
    /// Millis when marked spent, 0 while unspent
    pub spent_at: Millis,
    pub address: String,
    pub owner: KeyRef,
    pub asset: AssetKind,
    /// Set when the entry was created from our own broadcast rather than
    /// reported by the indexer
    #[serde(default)]
    pub synthesized_at: Option<Millis>,
}

impl TrackedUtxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn ordinal(&self) -> Option<&OrdinalMeta> {
        match &self.asset {
            AssetKind::Ordinal(meta) => Some(meta),
            AssetKind::Payment | AssetKind::Locked(_) => None,
        }
    }

    pub fn is_payment(&self) -> bool {
        matches!(self.asset, AssetKind::Payment)
    }
}

/// An output of a wallet-built transaction that the wallet itself owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedOutput {
    pub vout: u32,
    pub satoshis: u64,
    pub script: ScriptBuf,
    pub address: String,
    pub owner: KeyRef,
    pub asset: AssetKind,
}

/// Ledger effect of one broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDelta {
    pub txid: Txid,
    pub consumed: Vec<OutPoint>,
    pub created: Vec<OwnedOutput>,
}

/// Handle of a provisional hold on ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub(crate) u64);

/// Payment inputs chosen for a build, held until released or committed
#[derive(Debug, Clone)]
pub struct Selection {
    pub reservation: ReservationId,
    pub utxos: Vec<TrackedUtxo>,
    pub total: u64,
    pub fee: u64,
}
