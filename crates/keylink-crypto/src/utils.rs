//! Constant-time comparison helpers.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices without leaking where they differ.
///
/// ```rust
/// use keylink_crypto::utils::constant_time_compare;
///
/// assert!(constant_time_compare(b"abc", b"abc"));
/// assert!(!constant_time_compare(b"abc", b"abd"));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}

/// Constant-time equality of two strings, e.g. hex code hashes.
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}
