//! Curve25519 keypairs shared by key agreement and XEdDSA signing.
//!
//! The same 32-byte secret drives X25519 and, through the Edwards mapping in
//! [`crate::xeddsa`], signatures. Secret material is zeroized on drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::primitives::{random_bytes, scalar_mult, scalar_mult_base, CryptoError, KEY_LEN};
use crate::utils::constant_time_compare_array;
use crate::xeddsa::{self, SIGNATURE_LEN};

/// Serialized keypair length: `secret(32) || public(32)`.
pub const KEYPAIR_LEN: usize = 2 * KEY_LEN;

/// A Curve25519 keypair. `public` is always `scalar_mult_base(secret)`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    secret: [u8; KEY_LEN],
    public: [u8; KEY_LEN],
}

impl KeyPair {
    /// Generate a keypair from a fresh random secret.
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = Zeroizing::new(random_bytes::<KEY_LEN>()?);
        Ok(Self::from_secret(&secret))
    }

    /// Rebuild a keypair from its secret, deriving the public half.
    pub fn from_secret(secret: &[u8; KEY_LEN]) -> Self {
        Self {
            secret: *secret,
            public: scalar_mult_base(secret),
        }
    }

    /// Restore a keypair from its serialized form, checking that the stored
    /// public key really belongs to the stored secret.
    pub fn from_bytes(bytes: &[u8; KEYPAIR_LEN]) -> Result<Self, CryptoError> {
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        secret.copy_from_slice(&bytes[..KEY_LEN]);
        let keypair = Self::from_secret(&secret);

        let mut stored_public = [0u8; KEY_LEN];
        stored_public.copy_from_slice(&bytes[KEY_LEN..]);
        if !constant_time_compare_array(&keypair.public, &stored_public) {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(keypair)
    }

    /// Serialize as `secret || public`.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEYPAIR_LEN]> {
        let mut out = Zeroizing::new([0u8; KEYPAIR_LEN]);
        out[..KEY_LEN].copy_from_slice(&self.secret);
        out[KEY_LEN..].copy_from_slice(&self.public);
        out
    }

    pub fn public(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    /// X25519 with a peer public key.
    pub fn diffie_hellman(
        &self,
        peer_public: &[u8; KEY_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        scalar_mult(&self.secret, peer_public)
    }

    /// XEdDSA signature over `message` with fresh randomness.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
        xeddsa::sign(&self.secret, message)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
