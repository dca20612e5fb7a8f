use crate::error::{CryptoError, CryptoResult};

/// Fill `buf` from the OS CSPRNG.
///
/// Fails with [`CryptoError::EntropyUnavailable`] instead of falling back.
pub fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::EntropyUnavailable)
}

/// Generate a random 32-byte array.
pub fn random32() -> CryptoResult<[u8; 32]> {
    let mut out = [0u8; 32];
    fill_random(&mut out)?;
    Ok(out)
}
