//! ChaCha20-Poly1305 with random nonces.
//!
//! Wire form: `nonce(12) || ciphertext || tag(16)`.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KEY_LEN;
use crate::rng::fill_random;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a sealed blob. Any truncation or modification fails with
/// `AuthenticationFailed`; no plaintext is returned in that case.
pub fn open(key: &[u8; KEY_LEN], blob: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    seal(key, plaintext, &[])
}

pub fn decrypt(key: &[u8; KEY_LEN], blob: &[u8]) -> CryptoResult<Vec<u8>> {
    open(key, blob, &[])
}
