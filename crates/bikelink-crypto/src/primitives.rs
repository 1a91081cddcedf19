//! Fixed-size adapters over the curve, hash and AEAD primitives.
//!
//! Everything above this module talks in fixed-size arrays: 32-byte Curve25519
//! scalars and points, 24-byte XChaCha20 nonces and detached 16-byte Poly1305
//! tags. Failures are always reported to the caller, never degraded.

use blake2::{digest::consts::U32, Blake2b};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Key, Tag, XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Curve25519 scalar / point length.
pub const KEY_LEN: usize = 32;
/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;
/// Poly1305 tag length.
pub const MAC_LEN: usize = 16;
/// BLAKE2b-256 output length.
pub const HASH_LEN: usize = 32;
/// SHA-512 output length.
pub const WIDE_HASH_LEN: usize = 64;

type Blake2b256 = Blake2b<U32>;

/// Error type for primitive operations.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("random number generator failed")]
    Rng,
    #[error("key agreement produced a non-contributory shared secret")]
    WeakSharedSecret,
    #[error("stored secret does not match its public key")]
    KeyMismatch,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("authentication failed")]
    AuthenticationFailed,
}

/// Fill a fixed-size array from the OS RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

/// `scalar * basepoint` on Curve25519 (X25519 public key derivation).
pub fn scalar_mult_base(secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*secret);
    X25519PublicKey::from(&secret).to_bytes()
}

/// X25519 Diffie-Hellman.
///
/// Rejects low-order peer points, which would force an all-zero output.
pub fn scalar_mult(
    secret: &[u8; KEY_LEN],
    peer_public: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let secret = StaticSecret::from(*secret);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::WeakSharedSecret);
    }
    Ok(Zeroizing::new(shared.to_bytes()))
}

/// BLAKE2b-256 over the concatenation of `chunks`.
pub fn hash_kdf(chunks: &[&[u8]]) -> Zeroizing<[u8; HASH_LEN]> {
    let mut hasher = Blake2b256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let mut out = Zeroizing::new([0u8; HASH_LEN]);
    out.copy_from_slice(&hasher.finalize());
    out
}

/// SHA-512 over the concatenation of `chunks`, used by the signer.
pub fn sign_hash(chunks: &[&[u8]]) -> Zeroizing<[u8; WIDE_HASH_LEN]> {
    let mut hasher = Sha512::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let mut out = Zeroizing::new([0u8; WIDE_HASH_LEN]);
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Reduce a 64-byte hash modulo the group order.
pub fn scalar_reduce(wide: &[u8; WIDE_HASH_LEN]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(wide)
}

/// XChaCha20-Poly1305 seal with a detached tag.
///
/// Returns `(ciphertext, mac)`; the ciphertext has the plaintext's length.
pub fn aead_seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; MAC_LEN]), CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(nonce), ad, buffer.as_mut_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&tag);
    Ok((buffer, mac))
}

/// XChaCha20-Poly1305 open with a detached tag. Fails closed.
pub fn aead_open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ad: &[u8],
    ciphertext: &[u8],
    mac: &[u8; MAC_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(nonce),
            ad,
            buffer.as_mut_slice(),
            Tag::from_slice(mac),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(buffer)
}
