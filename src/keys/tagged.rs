//! Deterministic keys derived from application-supplied tags
//!
//! A tag's canonical JSON bytes are hashed into two hardened child indices
//! below the ordinal account, so equal tags always yield the same key and
//! distinct tags yield distinct keys with overwhelming probability.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use bitcoin::{Address, PrivateKey, PublicKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use std::collections::BTreeMap;

use super::{ecies, KeyRef, KeyRole, KeyVault, SeedMaterial};
use crate::error::WalletError;

/// Content type of an on-chain tag record
pub const TAG_CONTENT_TYPE: &str = "panda/tag";

const TAG_HMAC_KEY: &[u8] = b"ordwallet/tagged-derivation";
const MAX_FIELD_LEN: usize = 256;

/// Application-supplied identifier for a deterministic key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationTag {
    pub label: String,
    pub id: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl DerivationTag {
    pub fn new(label: impl Into<String>, id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
            domain: domain.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        for (name, value) in [("label", &self.label), ("id", &self.id)] {
            if value.trim().is_empty() {
                return Err(WalletError::InvalidTag(format!("{} must not be empty", name)));
            }
        }
        for (name, value) in [("label", &self.label), ("id", &self.id), ("domain", &self.domain)] {
            if value.len() > MAX_FIELD_LEN || value.chars().any(char::is_control) {
                return Err(WalletError::InvalidTag(format!("{} is malformed", name)));
            }
        }
        Ok(())
    }

    /// Canonical serialization: fixed field order, meta keys sorted
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, WalletError> {
        serde_json::to_vec(self).map_err(|e| WalletError::InvalidTag(e.to_string()))
    }

    fn derivation_path(&self) -> Result<DerivationPath, WalletError> {
        let mut mac = Hmac::<Sha512>::new_from_slice(TAG_HMAC_KEY)
            .map_err(|e| WalletError::Crypto(e.to_string()))?;
        mac.update(&self.canonical_bytes()?);
        let digest = mac.finalize().into_bytes();

        let index = |chunk: &[u8]| {
            let raw = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) & 0x7fff_ffff;
            ChildNumber::from_hardened_idx(raw).map_err(|e| WalletError::Bitcoin(e.to_string()))
        };

        let mut path = KeyRole::Ordinal.account_path();
        path.push(index(&digest[0..4])?);
        path.push(index(&digest[4..8])?);
        Ok(DerivationPath::from(path))
    }
}

/// Public result of a tag derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedKey {
    pub tag: DerivationTag,
    pub address: String,
    pub pub_key: String,
}

impl KeyVault {
    /// Derive the deterministic key for a tag
    pub fn derive_for_tag(&self, seed: &SeedMaterial, tag: &DerivationTag) -> Result<TaggedKey, WalletError> {
        let private_key = self.tagged_private_key(seed, tag)?;
        let public_key = PublicKey::from_private_key(self.secp(), &private_key);
        Ok(TaggedKey {
            tag: tag.clone(),
            address: Address::p2pkh(public_key.pubkey_hash(), self.network()).to_string(),
            pub_key: public_key.to_string(),
        })
    }

    pub(crate) fn tagged_private_key(&self, seed: &SeedMaterial, tag: &DerivationTag) -> Result<PrivateKey, WalletError> {
        tag.validate()?;
        self.private_key_at(seed, &tag.derivation_path()?)
    }

    /// Encrypt a tag to the wallet's own identity key
    pub fn seal_tag(&self, seed: &SeedMaterial, tag: &DerivationTag) -> Result<Vec<u8>, WalletError> {
        let identity = self.derive_address(seed, KeyRef::identity(0))?;
        ecies::encrypt(&identity.public_key.inner, &tag.canonical_bytes()?)
    }

    /// Rebuild tagged keys from on-chain tag records.
    ///
    /// Records that don't decrypt under the identity key, or don't parse as
    /// tags, are skipped.
    pub fn recover_tags_from_chain(&self, seed: &SeedMaterial, payloads: &[Vec<u8>]) -> Result<Vec<TaggedKey>, WalletError> {
        let identity = self.private_key(seed, KeyRef::identity(0))?;
        let mut recovered: Vec<TaggedKey> = Vec::new();

        for payload in payloads {
            let tag = match ecies::decrypt(&identity.inner, payload)
                .and_then(|plain| serde_json::from_slice::<DerivationTag>(&plain).map_err(|e| WalletError::InvalidTag(e.to_string())))
            {
                Ok(tag) => tag,
                Err(e) => {
                    log::debug!("Skipping unreadable tag record: {}", e);
                    continue;
                }
            };
            if recovered.iter().any(|k| k.tag == tag) {
                continue;
            }
            match self.derive_for_tag(seed, &tag) {
                Ok(key) => recovered.push(key),
                Err(e) => log::debug!("Skipping invalid tag {}: {}", tag.label, e),
            }
        }

        log::info!("Recovered {} tagged keys from {} records", recovered.len(), payloads.len());
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;
    use serde_json::json;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn setup() -> (KeyVault, SeedMaterial) {
        let vault = KeyVault::new(Network::Testnet);
        let seed = vault.restore(TEST_MNEMONIC).unwrap();
        (vault, seed)
    }

    #[test]
    fn test_same_tag_same_key() {
        let (vault, seed) = setup();
        let tag = DerivationTag::new("panda", "identity", "example.com");

        let first = vault.derive_for_tag(&seed, &tag).unwrap();
        let second = vault.derive_for_tag(&seed, &tag).unwrap();
        assert_eq!(first, second);

        let other = vault
            .derive_for_tag(&seed, &DerivationTag::new("panda", "identity-2", "example.com"))
            .unwrap();
        assert_ne!(first.address, other.address);
    }

    #[test]
    fn test_meta_order_does_not_matter() {
        let (vault, seed) = setup();
        let mut a = DerivationTag::new("l", "i", "d");
        a.meta.insert("x".into(), json!(1));
        a.meta.insert("y".into(), json!(2));
        let mut b = DerivationTag::new("l", "i", "d");
        b.meta.insert("y".into(), json!(2));
        b.meta.insert("x".into(), json!(1));

        assert_eq!(
            vault.derive_for_tag(&seed, &a).unwrap().address,
            vault.derive_for_tag(&seed, &b).unwrap().address
        );
    }

    #[test]
    fn test_rejects_malformed_tag() {
        let (vault, seed) = setup();
        let empty_label = DerivationTag::new("", "id", "d");
        assert!(matches!(
            vault.derive_for_tag(&seed, &empty_label),
            Err(WalletError::InvalidTag(_))
        ));
        let control = DerivationTag::new("a\u{0}", "id", "d");
        assert!(matches!(
            vault.derive_for_tag(&seed, &control),
            Err(WalletError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_recover_skips_foreign_records() {
        let (vault, seed) = setup();
        let tag = DerivationTag::new("panda", "identity", "example.com");
        let sealed = vault.seal_tag(&seed, &tag).unwrap();

        let foreign_seed = vault
            .restore("legal winner thank year wave sausage worth useful legal winner thank yellow")
            .unwrap();
        let foreign = vault.seal_tag(&foreign_seed, &tag).unwrap();

        let recovered = vault
            .recover_tags_from_chain(&seed, &[sealed.clone(), foreign, b"garbage".to_vec(), sealed])
            .unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0], vault.derive_for_tag(&seed, &tag).unwrap());
    }
}
