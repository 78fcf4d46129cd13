use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{ecdsa, All, Message, Secp256k1};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::{Address, Network, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// BIP44 coin type shared by every derivation root
pub const COIN_TYPE: u32 = 236;

const BLOB_VERSION: u8 = 1;
const ENTROPY_BYTES: usize = 16;

/// Independent key subtrees. Each role lives under its own hardened account,
/// so no role's key material can be used to derive another role's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// m/44'/236'/0'/1/i
    Payment,
    /// m/44'/236'/1'/0/i
    Ordinal,
    /// m/0'/236'/0'/0/i
    Identity,
}

impl KeyRole {
    /// Hardened account prefix of this role's subtree
    pub(crate) fn account_path(&self) -> Vec<ChildNumber> {
        let hardened = |i| ChildNumber::Hardened { index: i };
        match self {
            KeyRole::Payment => vec![hardened(44), hardened(COIN_TYPE), hardened(0)],
            KeyRole::Ordinal => vec![hardened(44), hardened(COIN_TYPE), hardened(1)],
            KeyRole::Identity => vec![hardened(0), hardened(COIN_TYPE), hardened(0)],
        }
    }

    pub fn derivation_path(&self, index: u32) -> Result<DerivationPath, WalletError> {
        let chain = match self {
            KeyRole::Payment => 1,
            KeyRole::Ordinal | KeyRole::Identity => 0,
        };
        let mut path = self.account_path();
        path.push(ChildNumber::from_normal_idx(chain).map_err(|e| WalletError::Bitcoin(e.to_string()))?);
        path.push(ChildNumber::from_normal_idx(index).map_err(|e| WalletError::Bitcoin(e.to_string()))?);
        Ok(DerivationPath::from(path))
    }
}

/// The key that controls an output: role subtree plus child index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    pub role: KeyRole,
    pub index: u32,
}

impl KeyRef {
    pub fn payment(index: u32) -> Self {
        Self { role: KeyRole::Payment, index }
    }

    pub fn ordinal(index: u32) -> Self {
        Self { role: KeyRole::Ordinal, index }
    }

    pub fn identity(index: u32) -> Self {
        Self { role: KeyRole::Identity, index }
    }
}

/// Source of randomness for new wallets.
pub trait EntropySource {
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), WalletError>;
}

/// Operating-system randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), WalletError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| WalletError::Entropy(e.to_string()))
    }
}

/// Mnemonic and BIP39 seed. Wiped from memory when dropped.
pub struct SeedMaterial {
    phrase: Zeroizing<String>,
    seed: Zeroizing<[u8; 64]>,
    network: Network,
}

impl SeedMaterial {
    pub fn mnemonic(&self) -> &str {
        &self.phrase
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn master(&self) -> Result<Xpriv, WalletError> {
        Xpriv::new_master(self.network, &self.seed[..]).map_err(|e| WalletError::Bitcoin(e.to_string()))
    }
}

impl PartialEq for SeedMaterial {
    fn eq(&self, other: &Self) -> bool {
        *self.phrase == *other.phrase && self.seed[..] == other.seed[..] && self.network == other.network
    }
}

impl fmt::Debug for SeedMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedMaterial")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Cheap parameters for tests and constrained hosts
    pub const fn fast() -> Self {
        Self {
            memory_cost: 256,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        // 64 MiB memory, 3 iterations, 4 parallel lanes
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Password-encrypted seed material, as persisted.
///
/// There is no password verifier: successful authenticated decryption is the
/// only proof that a password is correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyBlob {
    pub version: u8,
    /// Argon2 salt (32 bytes, base64)
    pub salt: String,
    /// AES-GCM nonce (12 bytes, base64)
    pub nonce: String,
    /// Ciphertext + auth tag (base64)
    pub ciphertext: String,
    pub kdf_params: KdfParams,
}

/// Public half of a derived key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: KeyRef,
    pub address: Address,
    pub public_key: PublicKey,
}

/// Key derivation, encryption at rest and signing.
#[derive(Clone)]
pub struct KeyVault {
    network: Network,
    secp: Secp256k1<All>,
}

impl KeyVault {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            secp: Secp256k1::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub(crate) fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Generate a new 12-word wallet
    pub fn create(&self, entropy: &mut dyn EntropySource) -> Result<SeedMaterial, WalletError> {
        let mut bytes = Zeroizing::new([0u8; ENTROPY_BYTES]);
        entropy.fill_bytes(&mut bytes[..])?;

        if bytes.iter().all(|b| *b == bytes[0]) {
            return Err(WalletError::Entropy(
                "entropy source returned a constant buffer".to_string(),
            ));
        }

        let mnemonic = Mnemonic::from_entropy(&bytes[..])
            .map_err(|e| WalletError::Entropy(e.to_string()))?;
        Ok(self.seed_from_mnemonic(&mnemonic))
    }

    /// Import a wallet from an existing mnemonic phrase
    pub fn restore(&self, words: &str) -> Result<SeedMaterial, WalletError> {
        let mnemonic = Mnemonic::parse_normalized(words.trim())
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(self.seed_from_mnemonic(&mnemonic))
    }

    fn seed_from_mnemonic(&self, mnemonic: &Mnemonic) -> SeedMaterial {
        SeedMaterial {
            phrase: Zeroizing::new(mnemonic.to_string()),
            seed: Zeroizing::new(mnemonic.to_seed("")),
            network: self.network,
        }
    }

    /// Encrypt seed material with a password (Argon2id + AES-256-GCM)
    pub fn encrypt(
        &self,
        seed: &SeedMaterial,
        password: &str,
        kdf_params: &KdfParams,
    ) -> Result<EncryptedKeyBlob, WalletError> {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(password, &salt, kdf_params)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| WalletError::Crypto(format!("Failed to create cipher: {}", e)))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), seed.mnemonic().as_bytes())
            .map_err(|e| WalletError::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedKeyBlob {
            version: BLOB_VERSION,
            salt: base64_encode(&salt),
            nonce: base64_encode(&nonce_bytes),
            ciphertext: base64_encode(&ciphertext),
            kdf_params: *kdf_params,
        })
    }

    /// Decrypt seed material.
    ///
    /// A malformed blob and a wrong password fail identically and only after
    /// the key derivation has run.
    pub fn decrypt(&self, blob: &EncryptedKeyBlob, password: &str) -> Result<SeedMaterial, WalletError> {
        let salt = base64_decode(&blob.salt)
            .filter(|s| s.len() >= 8)
            .unwrap_or_else(|| vec![0u8; 32]);
        let nonce = base64_decode(&blob.nonce).filter(|n| n.len() == 12);
        let ciphertext = base64_decode(&blob.ciphertext).unwrap_or_default();

        let key = derive_key(password, &salt, &blob.kdf_params).map_err(|_| WalletError::WrongPassword)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| WalletError::WrongPassword)?;

        let plaintext = nonce
            .filter(|_| blob.version == BLOB_VERSION)
            .and_then(|n| cipher.decrypt(Nonce::from_slice(&n), ciphertext.as_ref()).ok())
            .map(Zeroizing::new)
            .ok_or(WalletError::WrongPassword)?;

        let phrase = std::str::from_utf8(&plaintext)
            .map_err(|_| WalletError::Corrupted("decrypted key blob is not UTF-8".into()))?;
        self.restore(phrase)
            .map_err(|_| WalletError::Corrupted("decrypted key blob is not a mnemonic".into()))
    }

    /// Derive the address and public key for a role/index
    pub fn derive_address(&self, seed: &SeedMaterial, key: KeyRef) -> Result<DerivedKey, WalletError> {
        let private_key = self.private_key(seed, key)?;
        let public_key = PublicKey::from_private_key(&self.secp, &private_key);
        Ok(DerivedKey {
            key,
            address: Address::p2pkh(public_key.pubkey_hash(), self.network),
            public_key,
        })
    }

    /// Sign a 32-byte digest with the key at role/index
    pub fn sign(&self, seed: &SeedMaterial, key: KeyRef, sighash: &[u8; 32]) -> Result<ecdsa::Signature, WalletError> {
        let private_key = self.private_key(seed, key)?;
        let message = Message::from_digest(*sighash);
        Ok(self.secp.sign_ecdsa(&message, &private_key.inner))
    }

    /// Derive the private key for a role/index
    pub(crate) fn private_key(&self, seed: &SeedMaterial, key: KeyRef) -> Result<PrivateKey, WalletError> {
        let path = key.role.derivation_path(key.index)?;
        self.private_key_at(seed, &path)
    }

    pub(crate) fn private_key_at(&self, seed: &SeedMaterial, path: &DerivationPath) -> Result<PrivateKey, WalletError> {
        let master = seed.master()?;
        let derived = master
            .derive_priv(&self.secp, path)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        Ok(PrivateKey::new(derived.private_key, self.network))
    }

    /// Bitcoin signed-message signature (base64)
    pub(crate) fn sign_message_with(&self, private_key: &PrivateKey, message: &str) -> String {
        let digest = signed_msg_hash(message);
        let msg = Message::from_digest(digest.to_byte_array());
        let signature = self.secp.sign_ecdsa_recoverable(&msg, &private_key.inner);
        base64_encode(&MessageSignature::new(signature, true).serialize())
    }
}

/// Derive encryption key from password using Argon2id
fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let argon2_params = Params::new(params.memory_cost, params.time_cost, params.parallelism, Some(32))
        .map_err(|e| WalletError::Crypto(format!("Invalid KDF params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| WalletError::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}

pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub(crate) fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    struct FixedEntropy([u8; 16]);

    impl EntropySource for FixedEntropy {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), WalletError> {
            dest.copy_from_slice(&self.0[..dest.len()]);
            Ok(())
        }
    }

    struct BrokenEntropy;

    impl EntropySource for BrokenEntropy {
        fn fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), WalletError> {
            Err(WalletError::Entropy("device unavailable".into()))
        }
    }

    fn vault() -> KeyVault {
        KeyVault::new(Network::Testnet)
    }

    #[test]
    fn test_create_from_entropy() {
        let seed = vault().create(&mut FixedEntropy([7u8; 16])).err();
        assert!(matches!(seed, Some(WalletError::Entropy(_))));

        let mut bytes = [0u8; 16];
        bytes.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        let seed = vault().create(&mut FixedEntropy(bytes)).unwrap();
        assert_eq!(seed.mnemonic().split_whitespace().count(), 12);
        assert!(vault().restore(seed.mnemonic()).is_ok());
    }

    #[test]
    fn test_create_propagates_entropy_failure() {
        assert!(matches!(
            vault().create(&mut BrokenEntropy),
            Err(WalletError::Entropy(_))
        ));
    }

    #[test]
    fn test_restore_rejects_bad_checksum() {
        let bad = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(matches!(
            vault().restore(bad),
            Err(WalletError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = vault();
        let seed = vault.restore(TEST_MNEMONIC).unwrap();
        let blob = vault.encrypt(&seed, "hunter2!", &KdfParams::fast()).unwrap();

        let decrypted = vault.decrypt(&blob, "hunter2!").unwrap();
        assert_eq!(decrypted, seed);
        assert!(!blob.ciphertext.contains("abandon"));
    }

    #[test]
    fn test_wrong_password_and_corrupt_blob_fail_alike() {
        let vault = vault();
        let seed = vault.restore(TEST_MNEMONIC).unwrap();
        let blob = vault.encrypt(&seed, "correct", &KdfParams::fast()).unwrap();

        assert!(matches!(
            vault.decrypt(&blob, "incorrect"),
            Err(WalletError::WrongPassword)
        ));

        let mut corrupt = blob.clone();
        corrupt.nonce = "not base64!".to_string();
        assert!(matches!(
            vault.decrypt(&corrupt, "correct"),
            Err(WalletError::WrongPassword)
        ));
    }

    #[test]
    fn test_roles_are_independent_subtrees() {
        let vault = vault();
        let seed = vault.restore(TEST_MNEMONIC).unwrap();

        let payment = vault.derive_address(&seed, KeyRef::payment(0)).unwrap();
        let ordinal = vault.derive_address(&seed, KeyRef::ordinal(0)).unwrap();
        let identity = vault.derive_address(&seed, KeyRef::identity(0)).unwrap();

        assert_ne!(payment.address, ordinal.address);
        assert_ne!(ordinal.address, identity.address);
        assert_eq!(
            KeyRole::Payment.derivation_path(3).unwrap().to_string(),
            "m/44'/236'/0'/1/3"
        );
        assert_eq!(
            KeyRole::Identity.derivation_path(0).unwrap().to_string(),
            "m/0'/236'/0'/0/0"
        );

        // Deterministic
        let again = vault.derive_address(&seed, KeyRef::payment(0)).unwrap();
        assert_eq!(payment, again);
    }

    #[test]
    fn test_sign_verifies_against_derived_key() {
        let vault = vault();
        let seed = vault.restore(TEST_MNEMONIC).unwrap();
        let digest = <bitcoin::hashes::sha256::Hash as bitcoin::hashes::Hash>::hash(b"payload").to_byte_array();

        let signature = vault.sign(&seed, KeyRef::payment(0), &digest).unwrap();
        let derived = vault.derive_address(&seed, KeyRef::payment(0)).unwrap();

        vault
            .secp()
            .verify_ecdsa(&Message::from_digest(digest), &signature, &derived.public_key.inner)
            .expect("signature must verify");
    }
}
