//! Base64 text for key material crossing a boundary.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KEY_LEN;

pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Decode a base64 string that must carry exactly one 32-byte key.
pub fn decode_key32(s: &str) -> CryptoResult<[u8; KEY_LEN]> {
    let mut raw = b64_decode(s)?;
    let got = raw.len();
    let out: Result<[u8; KEY_LEN], _> = raw.as_slice().try_into();
    zeroize::Zeroize::zeroize(&mut raw);
    out.map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LEN,
        got,
    })
}
