//! Symmetric encryption of message content.
//!
//! Every conversation owns one 256-bit key for its lifetime (no rotation).
//! Message bodies travel as `base64(nonce || ciphertext)` so they can be
//! embedded in JSON frames and REST payloads.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::NONCE_SIZE;
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt and encode in the transport form carried by protocol frames.
pub fn encrypt_b64(key: &SymmetricKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    Ok(BASE64.encode(encrypt(key, plaintext)?))
}

/// Decode the transport form and decrypt. Any failure (bad base64, short
/// data, wrong key) collapses into `DecryptionFailed`.
pub fn decrypt_b64(key: &SymmetricKey, data_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let data = BASE64
        .decode(data_b64)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    decrypt(key, &data)
}
