use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Short hex prefix of a digest, safe to put in logs.
pub fn log_prefix(hex_digest: &str) -> &str {
    let end = hex_digest.len().min(12);
    &hex_digest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_log_prefix_short_input() {
        assert_eq!(log_prefix("abc"), "abc");
        assert_eq!(log_prefix("0123456789abcdef"), "0123456789ab");
    }
}
