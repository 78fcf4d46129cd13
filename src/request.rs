//! Request surface for connected applications
//!
//! Each request kind is its own variant with exactly the fields it needs.

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::WalletError;
use crate::indexer::types::parse_outpoint;
use crate::keys::{DerivationTag, TaggedKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WalletRequest {
    #[serde(rename_all = "camelCase")]
    Connect {
        app_name: String,
        domain: String,
        #[serde(default)]
        icon_url: Option<String>,
    },
    GetAddresses,
    GetBalance,
    SendBsv {
        address: String,
        satoshis: u64,
    },
    TransferOrdinal {
        outpoint: String,
        address: String,
    },
    ListOrdinal {
        outpoint: String,
        price: u64,
    },
    CancelListing {
        outpoint: String,
    },
    SignMessage {
        message: String,
        #[serde(default)]
        tag: Option<DerivationTag>,
    },
    GenerateTaggedKeys {
        tag: DerivationTag,
    },
    #[serde(rename_all = "camelCase")]
    Encrypt {
        message: String,
        /// Hex public keys; empty means the wallet's own identity key
        #[serde(default)]
        pub_keys: Vec<String>,
    },
    Decrypt {
        /// Base64 ciphertexts
        messages: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addresses {
    pub payment_address: String,
    pub ordinal_address: String,
    pub identity_address: String,
    pub payment_pub_key: String,
    pub ordinal_pub_key: String,
    pub identity_pub_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    pub address: String,
    pub pub_key: String,
    /// Base64 compact recoverable signature
    pub sig: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_tag: Option<DerivationTag>,
}

/// An application allowed to talk to the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistedApp {
    pub domain: String,
    pub app_name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WalletResponse {
    #[serde(rename_all = "camelCase")]
    Connected { identity_pub_key: String },
    Addresses(Addresses),
    Balance { satoshis: u64 },
    Broadcast { txid: String },
    Signed(SignedMessage),
    TaggedKey(TaggedKey),
    Encrypted { messages: Vec<String> },
    Decrypted { messages: Vec<String> },
}

/// Accepts both `txid_vout` and `txid:vout`
pub fn parse_outpoint_arg(s: &str) -> Result<OutPoint, WalletError> {
    parse_outpoint(s)
        .or_else(|| OutPoint::from_str(s).ok())
        .ok_or_else(|| WalletError::OrdinalNotFound(format!("malformed outpoint {}", s)))
}
