//! Constant-time helpers.
//!
//! Key lookups in the pairing table and stored-key checks compare public
//! key bytes that an attacker may be probing for; these comparisons must not
//! leak how many leading bytes matched.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// ```rust
/// use bikelink_crypto::utils::constant_time_compare;
///
/// let sig1 = [0u8; 64];
/// let sig2 = [0u8; 64];
/// assert!(constant_time_compare(&sig1, &sig2));
/// assert!(!constant_time_compare(&sig1, &[1u8; 64]));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Compare two fixed-size arrays in constant time.
pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}

/// `true` when every byte is zero, without early exit.
///
/// An all-zero public key marks a free pairing slot.
pub fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, b| acc | b) == 0
}
