//! X25519 ephemeral key agreement.
//!
//! An [`EphemeralKeyPair`] is consumed by [`compute_shared_secret`], so the
//! private half cannot be reused for a second agreement. Dropping it on any
//! other path zeroizes the secret.

use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encoding::{b64_decode, b64_encode};
use crate::error::{CryptoError, CryptoResult};
use crate::rng::random32;

/// Peer-visible X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Fails with `InvalidKey` unless `bytes` is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        b64_encode(&self.0)
    }

    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let raw = b64_decode(s).map_err(|_| CryptoError::InvalidKey)?;
        Self::from_bytes(&raw)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Run the agreement, consuming the private half.
    pub fn agree(self, their_public: &PublicKey) -> CryptoResult<SharedSecret> {
        let peer = X25519PublicKey::from(their_public.0);
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey);
        }
        Ok(SharedSecret(shared.to_bytes()))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Raw X25519 output. Only used to derive a session key and the SAS.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

pub fn generate_ephemeral_keypair() -> CryptoResult<EphemeralKeyPair> {
    let mut seed = random32()?;
    let secret = StaticSecret::from(seed);
    seed.zeroize();
    let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
    Ok(EphemeralKeyPair { secret, public })
}

/// Compute the shared secret with the peer's public key.
///
/// Fails with `InvalidKey` when the peer key is a low-order point.
pub fn compute_shared_secret(
    ours: EphemeralKeyPair,
    their_public: &PublicKey,
) -> CryptoResult<SharedSecret> {
    ours.agree(their_public)
}
