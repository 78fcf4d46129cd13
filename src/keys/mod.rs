//! Key management
//!
//! Mnemonic creation and import, encryption at rest, role-separated BIP32
//! derivation and tag-based deterministic keys.

pub mod ecies;
mod tagged;
mod vault;

pub use tagged::{DerivationTag, TaggedKey, TAG_CONTENT_TYPE};
pub use vault::{
    DerivedKey, EncryptedKeyBlob, EntropySource, KdfParams, KeyRef, KeyRole, KeyVault, OsEntropy,
    SeedMaterial, COIN_TYPE,
};

pub(crate) use vault::{base64_decode, base64_encode};
