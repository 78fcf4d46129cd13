//! ECIES over secp256k1
//!
//! Payload layout: `ephemeral_pubkey(33) || nonce(12) || aes-256-gcm ciphertext`.
//! The AES key is SHA-256 of the ECDH shared point.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, SecretKey};

use crate::error::WalletError;

const PUBKEY_LEN: usize = 33;
const NONCE_LEN: usize = 12;

pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, WalletError> {
    let ephemeral = SecretKey::new(&mut rand::thread_rng());
    let ephemeral_pub = PublicKey::from_secret_key(secp256k1::SECP256K1, &ephemeral);
    let cipher = cipher_for(&SharedSecret::new(recipient, &ephemeral))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| WalletError::Crypto(format!("ECIES encryption failed: {}", e)))?;

    let mut payload = Vec::with_capacity(PUBKEY_LEN + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&ephemeral_pub.serialize());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

pub fn decrypt(secret: &SecretKey, payload: &[u8]) -> Result<Vec<u8>, WalletError> {
    if payload.len() < PUBKEY_LEN + NONCE_LEN {
        return Err(WalletError::Crypto("ECIES payload too short".into()));
    }
    let (pubkey, rest) = payload.split_at(PUBKEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral_pub = PublicKey::from_slice(pubkey)
        .map_err(|e| WalletError::Crypto(format!("Invalid ephemeral key: {}", e)))?;
    let cipher = cipher_for(&SharedSecret::new(&ephemeral_pub, secret))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| WalletError::Crypto("ECIES decryption failed".into()))
}

fn cipher_for(shared: &SharedSecret) -> Result<Aes256Gcm, WalletError> {
    // SharedSecret::new already hashes the point with SHA-256
    Aes256Gcm::new_from_slice(&shared.secret_bytes())
        .map_err(|e| WalletError::Crypto(format!("Failed to create cipher: {}", e)))
}
