#![forbid(unsafe_code)]

//! Cryptographic building blocks for the bike-side pairing core.
//!
//! - [`primitives`]: fixed-size X25519, BLAKE2b, SHA-512 and
//!   XChaCha20-Poly1305 operations
//! - [`keypair`]: Curve25519 keypairs with zeroizing secrets
//! - [`xeddsa`]: signatures made with the same keys used for key agreement

pub mod primitives;
pub mod keypair;
pub mod xeddsa;
pub mod utils;

#[cfg(test)]
mod proptests;

pub use keypair::{KeyPair, KEYPAIR_LEN};
pub use primitives::CryptoError;
pub use xeddsa::SIGNATURE_LEN;
