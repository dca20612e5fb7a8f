//! keylink key hierarchy.
//!
//! Stateless cryptographic operations shared by every device of an account:
//! root key generation, versioned key derivation, X25519 ephemeral agreement,
//! session key derivation, ChaCha20-Poly1305 sealing, pairing codes and the
//! short authentication string (SAS).
//!
//! Every function here is pure apart from the CSPRNG-backed generators.

#![forbid(unsafe_code)]

pub mod error;
pub mod rng;
pub mod hash;
pub mod transcript;

pub mod keys;
pub mod exchange;
pub mod aead;

pub mod pairing_code;
pub mod sas;

pub mod encoding;
pub mod utils;

#[cfg(test)]
mod proptests;

pub use error::{CryptoError, CryptoResult};
pub use exchange::{
    compute_shared_secret, generate_ephemeral_keypair, EphemeralKeyPair, PublicKey, SharedSecret,
};
pub use keys::{
    derive_key, derive_session_key, generate_device_id, generate_root_key, DerivedKey, RootKey,
    SessionKey, KEY_LEN,
};
pub use pairing_code::{
    generate_pairing_code, hash_pairing_code, normalize_pairing_code, PairingCode,
};
pub use sas::compute_sas;
