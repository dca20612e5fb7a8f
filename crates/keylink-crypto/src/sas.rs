use crate::exchange::SharedSecret;
use crate::hash::sha256;
use crate::transcript::{tags, Transcript};

/// 6-digit SAS from a transcript bytes blob.
/// Stable across platforms. Uses first 4 bytes big-endian.
pub fn sas_6digit(transcript_bytes: &[u8]) -> String {
    let h = sha256(transcript_bytes);
    let n = u32::from_be_bytes([h[0], h[1], h[2], h[3]]) % 1_000_000;
    format!("{:06}", n)
}

/// Verification code both participants display for comparison.
pub fn compute_sas(shared: &SharedSecret) -> String {
    let mut t = Transcript::new("keylink_sas_v1");
    t.append_bytes(tags::KEY, shared.as_bytes());
    sas_6digit(t.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sas_known_answer() {
        let shared = SharedSecret::from_bytes([0x42; 32]);
        assert_eq!(compute_sas(&shared), "717978");
    }

    #[test]
    fn test_sas_is_zero_padded() {
        for i in 0..64u8 {
            let sas = compute_sas(&SharedSecret::from_bytes([i; 32]));
            assert_eq!(sas.len(), 6);
            assert!(sas.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
