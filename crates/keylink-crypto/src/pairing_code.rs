//! Short human-typed pairing codes.
//!
//! Codes use a 31-symbol alphabet without `0 O 1 I L`. Only the keyed hash of
//! a code is ever sent to the relay.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::rng::fill_random;

type HmacSha256 = Hmac<Sha256>;

pub const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const PAIRING_CODE_LEN: usize = 6;

const CODE_HASH_KEY: &[u8] = b"keylink-pairing-code-v1";

// Largest multiple of the alphabet size that fits in a byte.
const ACCEPT_BELOW: u8 = (256 / PAIRING_CODE_ALPHABET.len() * PAIRING_CODE_ALPHABET.len()) as u8;

/// A canonical pairing code: exactly six alphabet characters.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PairingCode(String);

impl PairingCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PairingCode(******)")
    }
}

impl std::str::FromStr for PairingCode {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize_pairing_code(s)
    }
}

/// Uniformly random code, by rejection sampling over CSPRNG bytes.
pub fn generate_pairing_code() -> CryptoResult<PairingCode> {
    let n = PAIRING_CODE_ALPHABET.len();
    let mut code = String::with_capacity(PAIRING_CODE_LEN);
    let mut buf = [0u8; 16];
    while code.len() < PAIRING_CODE_LEN {
        fill_random(&mut buf)?;
        for &b in buf.iter() {
            if b >= ACCEPT_BELOW {
                continue;
            }
            code.push(PAIRING_CODE_ALPHABET[b as usize % n] as char);
            if code.len() == PAIRING_CODE_LEN {
                break;
            }
        }
    }
    buf.zeroize();
    Ok(PairingCode(code))
}

/// Canonicalize user input: drop whitespace and `-`, uppercase.
///
/// The result must be exactly six alphabet characters.
pub fn normalize_pairing_code(input: &str) -> CryptoResult<PairingCode> {
    let code: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = code.len() == PAIRING_CODE_LEN
        && code
            .bytes()
            .all(|b| PAIRING_CODE_ALPHABET.contains(&b));
    if !valid {
        return Err(CryptoError::InvalidPairingCode);
    }
    Ok(PairingCode(code))
}

/// Hex HMAC-SHA256 of the canonical code under a fixed domain key.
pub fn hash_pairing_code(code: &PairingCode) -> CryptoResult<String> {
    let mut mac =
        HmacSha256::new_from_slice(CODE_HASH_KEY).map_err(|_| CryptoError::KeyDerivation)?;
    mac.update(code.0.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
