//! Error type for key hierarchy operations.

/// Errors produced by `keylink-crypto`.
///
/// `EntropyUnavailable` is the only fatal variant: there is no weaker
/// randomness source to fall back to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("entropy source unavailable")]
    EntropyUnavailable,
    #[error("invalid public key")]
    InvalidKey,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("invalid pairing code")]
    InvalidPairingCode,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
