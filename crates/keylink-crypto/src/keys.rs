//! Symmetric key material: the account root key, its versioned derivations,
//! and per-session keys.
//!
//! All types zeroize their bytes on drop and never print them in `Debug`.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead;
use crate::encoding::{b64_encode, decode_key32};
use crate::error::{CryptoError, CryptoResult};
use crate::exchange::SharedSecret;
use crate::rng::{fill_random, random32};
use crate::utils::constant_time_compare_array;

pub const KEY_LEN: usize = 32;

const DEK_DOMAIN: &[u8] = b"keylink-dek-v1";
const DEK_LABEL: &[u8] = b"dek";

/// Context string for the pairing session key.
pub const PAIRING_SESSION_CONTEXT: &[u8] = b"keylink-pairing-session-v1";

/// Account root key. One per account, replaced only by a sync reset.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; KEY_LEN]);

impl RootKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        b64_encode(&self.0)
    }

    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        decode_key32(s).map(Self)
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare_array(&self.0, &other.0)
    }
}

impl Eq for RootKey {}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKey(<redacted>)")
    }
}

/// Data-encryption key for one key version.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    #[zeroize(skip)]
    version: u32,
    key: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::encrypt(&self.key, plaintext)
    }

    pub fn decrypt(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::decrypt(&self.key, blob)
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && constant_time_compare_array(&self.key, &other.key)
    }
}

impl Eq for DerivedKey {}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("version", &self.version)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Key scoped to a single pairing session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encrypt with associated data. Output: nonce(12) || ciphertext || tag(16).
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::seal(&self.0, plaintext, aad)
    }

    pub fn open(&self, blob: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::open(&self.0, blob, aad)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Generate a fresh 256-bit root key from the OS CSPRNG.
pub fn generate_root_key() -> CryptoResult<RootKey> {
    random32().map(RootKey)
}

/// Derive the data-encryption key for `version`.
///
/// HKDF-SHA256 with `ikm = root`, no salt and
/// `info = "keylink-dek-v1" || "dek" || version (u32 BE)`.
/// Every device must produce the same bytes for the same inputs.
pub fn derive_key(root: &RootKey, version: u32) -> CryptoResult<DerivedKey> {
    let hk = Hkdf::<Sha256>::new(None, &root.0);

    let mut info = Vec::with_capacity(DEK_DOMAIN.len() + DEK_LABEL.len() + 4);
    info.extend_from_slice(DEK_DOMAIN);
    info.extend_from_slice(DEK_LABEL);
    info.extend_from_slice(&version.to_be_bytes());

    let mut key = [0u8; KEY_LEN];
    hk.expand(&info, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(DerivedKey { version, key })
}

/// Derive a session key from an agreed secret.
///
/// The shared secret itself is never used as a cipher key.
pub fn derive_session_key(shared: &SharedSecret, context: &[u8]) -> CryptoResult<SessionKey> {
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; KEY_LEN];
    hk.expand(context, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SessionKey(key))
}

/// Random UUID v4 in its hyphenated text form.
pub fn generate_device_id() -> CryptoResult<String> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes)?;
    Ok(uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string())
}
