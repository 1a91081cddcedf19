//! XEdDSA: EdDSA-compatible signatures from X25519 keypairs.
//!
//! A Montgomery public key only carries the `u` coordinate, so its Edwards
//! counterpart is ambiguous up to the sign of `x`. The signer resolves this by
//! negating its scalar whenever the Edwards public point has the sign bit set;
//! the verifier always lifts `u` to the sign-0 representative. Signatures are
//! then plain Ed25519 signatures and are checked with `verify_strict`, which
//! rejects small-order keys and `R` points and non-canonical `s`.

use curve25519_dalek::{
    edwards::EdwardsPoint,
    montgomery::MontgomeryPoint,
    scalar::{clamp_integer, Scalar},
};
use ed25519_dalek::{Signature, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

use crate::primitives::{random_bytes, scalar_reduce, sign_hash, CryptoError, KEY_LEN};

/// Signature length: `R(32) || s(32)`.
pub const SIGNATURE_LEN: usize = 64;

/// Length of the fresh randomness mixed into every nonce.
pub const NONCE_RANDOMNESS_LEN: usize = 64;

/// `hash1` domain prefix: the encoding of `2^256 - 2`, little-endian.
const HASH1_PREFIX: [u8; 32] = {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFE;
    prefix
};

/// Sign `message` with an X25519 secret key.
pub fn sign(
    secret_key: &[u8; KEY_LEN],
    message: &[u8],
) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
    let randomness = Zeroizing::new(random_bytes::<NONCE_RANDOMNESS_LEN>()?);
    Ok(sign_with_randomness(secret_key, message, &randomness))
}

/// Deterministic core of [`sign`]; the randomness must be fresh per call.
pub(crate) fn sign_with_randomness(
    secret_key: &[u8; KEY_LEN],
    message: &[u8],
    randomness: &[u8; NONCE_RANDOMNESS_LEN],
) -> [u8; SIGNATURE_LEN] {
    let mut clamped = clamp_integer(*secret_key);
    let mut a = Scalar::from_bytes_mod_order(clamped);
    clamped.zeroize();

    let mut public = EdwardsPoint::mul_base(&a).compress().to_bytes();
    if public[31] & 0x80 != 0 {
        a = -a;
        public[31] &= 0x7F;
    }

    let mut r = scalar_reduce(&sign_hash(&[
        &HASH1_PREFIX[..],
        &a.as_bytes()[..],
        message,
        &randomness[..],
    ]));
    let big_r = EdwardsPoint::mul_base(&r).compress();

    let h = scalar_reduce(&sign_hash(&[big_r.as_bytes(), &public[..], message]));
    let s = h * a + r;

    a.zeroize();
    r.zeroize();

    let mut signature = [0u8; SIGNATURE_LEN];
    signature[..32].copy_from_slice(big_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature
}

/// Verify an XEdDSA signature against an X25519 public key.
///
/// Malformed, non-canonical or low-order inputs verify as `false`.
pub fn verify(public_key: &[u8; KEY_LEN], message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
    let Some(edwards) = to_edwards(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&edwards.compress().to_bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Lift a Montgomery `u` coordinate to its sign-0 Edwards point.
///
/// Only canonical encodings are accepted: the unused top bit must be clear
/// and `u` must be below the field prime, so a single public key never has
/// two accepted encodings.
fn to_edwards(public_key: &[u8; KEY_LEN]) -> Option<EdwardsPoint> {
    if public_key[31] & 0x80 != 0 || !is_canonical_field_element(public_key) {
        return None;
    }
    MontgomeryPoint(*public_key).to_edwards(0)
}

/// `true` when the little-endian value is below `2^255 - 19`.
fn is_canonical_field_element(bytes: &[u8; KEY_LEN]) -> bool {
    let top_saturated = bytes[31] == 0x7F && bytes[1..31].iter().all(|b| *b == 0xFF);
    !(top_saturated && bytes[0] >= 0xED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::scalar_mult_base;

    fn keypair(seed: u8) -> ([u8; 32], [u8; 32]) {
        let mut secret = [seed; 32];
        secret[0] = seed.wrapping_add(7);
        (secret, scalar_mult_base(&secret))
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let (sk, pk) = keypair(3);
        let sig = sign(&sk, b"contents").unwrap();
        assert!(verify(&pk, b"contents", &sig));
    }

    #[test]
    fn test_signatures_are_randomized() {
        let (sk, pk) = keypair(5);
        let a = sign(&sk, b"same message").unwrap();
        let b = sign(&sk, b"same message").unwrap();
        assert_ne!(a, b);
        assert!(verify(&pk, b"same message", &a));
        assert!(verify(&pk, b"same message", &b));
    }

    #[test]
    fn test_fixed_randomness_is_deterministic() {
        let (sk, _) = keypair(9);
        let z = [0x5Au8; NONCE_RANDOMNESS_LEN];
        assert_eq!(
            sign_with_randomness(&sk, b"msg", &z),
            sign_with_randomness(&sk, b"msg", &z)
        );
    }

    #[test]
    fn test_signer_public_matches_lifted_montgomery_key() {
        for seed in 0..16u8 {
            let (sk, pk) = keypair(seed);
            let a = Scalar::from_bytes_mod_order(clamp_integer(sk));
            let mut expected = EdwardsPoint::mul_base(&a).compress().to_bytes();
            expected[31] &= 0x7F;
            let lifted = to_edwards(&pk).unwrap().compress().to_bytes();
            assert_eq!(lifted, expected);
        }
    }

    #[test]
    fn test_wrong_message_fails() {
        let (sk, pk) = keypair(11);
        let sig = sign(&sk, b"original").unwrap();
        assert!(!verify(&pk, b"tampered", &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let (sk, _) = keypair(12);
        let (_, other_pk) = keypair(13);
        let sig = sign(&sk, b"message").unwrap();
        assert!(!verify(&other_pk, b"message", &sig));
    }

    #[test]
    fn test_every_signature_bit_flip_fails() {
        let (sk, pk) = keypair(21);
        let sig = sign(&sk, b"flip").unwrap();
        for bit in 0..SIGNATURE_LEN * 8 {
            let mut bad = sig;
            bad[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify(&pk, b"flip", &bad), "bit {} accepted", bit);
        }
    }

    #[test]
    fn test_every_public_key_bit_flip_fails() {
        let (sk, pk) = keypair(22);
        let sig = sign(&sk, b"flip").unwrap();
        for bit in 0..KEY_LEN * 8 {
            let mut bad = pk;
            bad[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify(&bad, b"flip", &sig), "bit {} accepted", bit);
        }
    }

    #[test]
    fn test_low_order_public_keys_rejected() {
        let (sk, _) = keypair(23);
        let sig = sign(&sk, b"msg").unwrap();

        let zero = [0u8; 32];
        let mut one = [0u8; 32];
        one[0] = 1;
        assert!(!verify(&zero, b"msg", &sig));
        assert!(!verify(&one, b"msg", &sig));
    }

    #[test]
    fn test_non_canonical_u_rejected() {
        let mut p = [0xFFu8; 32];
        p[31] = 0x7F;
        p[0] = 0xED;
        assert!(!is_canonical_field_element(&p));
        p[0] = 0xEC;
        assert!(is_canonical_field_element(&p));
        assert!(to_edwards(&[0xFFu8; 32]).is_none());
    }

    #[test]
    fn test_all_zero_signature_rejected() {
        let (_, pk) = keypair(24);
        assert!(!verify(&pk, b"msg", &[0u8; SIGNATURE_LEN]));
    }
}
