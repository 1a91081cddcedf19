//! Length-checked codecs for the messages exchanged with the phone.
//!
//! Every decoder checks the exact byte length before reading a single field.
//! Signed messages carry `signature(64)` followed by their contents, and the
//! signature always covers exactly the content bytes as they appear on the
//! wire. Timestamps are unsigned 64-bit little-endian Unix seconds.
//!
//! | Message | Layout |
//! |---|---|
//! | `PairRequest` | `signature ‖ bike_identity_pk ‖ phone_identity_pk ‖ phone_pairing_pk ‖ start ‖ end` |
//! | `PairResponse` | `signature ‖ phone_pairing_pk ‖ bike_pairing_pk` |
//! | `SessionRequest` | `signature ‖ phone_pairing_pk ‖ bike_pairing_pk ‖ phone_identity_pk ‖ phone_ephemeral_pk` |
//! | `SessionResponse` | `signature ‖ ephemeral_pk ‖ session_id` |
//! | Secure frame | `mac(16) ‖ nonce(24) ‖ ciphertext` |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use bikelink_crypto::SIGNATURE_LEN;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SESSION_ID_LEN: usize = 32;
pub const TIMESTAMP_LEN: usize = 8;

pub const PAIR_REQUEST_CONTENTS_LEN: usize = 3 * PUBLIC_KEY_LEN + 2 * TIMESTAMP_LEN;
pub const PAIR_REQUEST_LEN: usize = SIGNATURE_LEN + PAIR_REQUEST_CONTENTS_LEN;
pub const PAIR_RESPONSE_CONTENTS_LEN: usize = 2 * PUBLIC_KEY_LEN;
pub const PAIR_RESPONSE_LEN: usize = SIGNATURE_LEN + PAIR_RESPONSE_CONTENTS_LEN;
pub const SESSION_REQUEST_CONTENTS_LEN: usize = 4 * PUBLIC_KEY_LEN;
pub const SESSION_REQUEST_LEN: usize = SIGNATURE_LEN + SESSION_REQUEST_CONTENTS_LEN;
pub const SESSION_RESPONSE_CONTENTS_LEN: usize = PUBLIC_KEY_LEN + SESSION_ID_LEN;
pub const SESSION_RESPONSE_LEN: usize = SIGNATURE_LEN + SESSION_RESPONSE_CONTENTS_LEN;

pub const FRAME_MAC_LEN: usize = 16;
pub const FRAME_NONCE_LEN: usize = 24;
/// Bytes a secure frame adds on top of its ciphertext.
pub const FRAME_OVERHEAD: usize = FRAME_MAC_LEN + FRAME_NONCE_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("{message} must be {expected} bytes, got {actual}")]
    Length {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("frame of {actual} bytes is shorter than the {minimum}-byte header")]
    Truncated { minimum: usize, actual: usize },
}

fn check_len(message: &'static str, bytes: &[u8], expected: usize) -> Result<(), WireError> {
    if bytes.len() != expected {
        return Err(WireError::Length {
            message,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(buf: &mut impl Buf) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

// ============================================================================
// Pairing
// ============================================================================

/// Window during which the phone pairing key is valid, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Validity {
    pub start: u64,
    pub end: u64,
}

impl Validity {
    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, now_unix: u64) -> bool {
        self.start <= now_unix && now_unix <= self.end
    }
}

/// Server-authorised pairing contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRequestContents {
    pub bike_identity_pk: [u8; PUBLIC_KEY_LEN],
    pub phone_identity_pk: [u8; PUBLIC_KEY_LEN],
    pub phone_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub validity: Validity,
}

impl PairRequestContents {
    /// The exact bytes covered by the server signature.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAIR_REQUEST_CONTENTS_LEN);
        buf.put_slice(&self.bike_identity_pk);
        buf.put_slice(&self.phone_identity_pk);
        buf.put_slice(&self.phone_pairing_pk);
        buf.put_u64_le(self.validity.start);
        buf.put_u64_le(self.validity.end);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRequest {
    pub signature: [u8; SIGNATURE_LEN],
    pub contents: PairRequestContents,
}

impl PairRequest {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("pair request", bytes, PAIR_REQUEST_LEN)?;
        let mut buf = bytes;
        let signature = read_array(&mut buf);
        let contents = PairRequestContents {
            bike_identity_pk: read_array(&mut buf),
            phone_identity_pk: read_array(&mut buf),
            phone_pairing_pk: read_array(&mut buf),
            validity: Validity {
                start: buf.get_u64_le(),
                end: buf.get_u64_le(),
            },
        };
        Ok(Self {
            signature,
            contents,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAIR_REQUEST_LEN);
        buf.put_slice(&self.signature);
        buf.put(self.contents.to_bytes());
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResponseContents {
    pub phone_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub bike_pairing_pk: [u8; PUBLIC_KEY_LEN],
}

impl PairResponseContents {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAIR_RESPONSE_CONTENTS_LEN);
        buf.put_slice(&self.phone_pairing_pk);
        buf.put_slice(&self.bike_pairing_pk);
        buf.freeze()
    }
}

/// Signed with the new bike pairing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResponse {
    pub signature: [u8; SIGNATURE_LEN],
    pub contents: PairResponseContents,
}

impl PairResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("pair response", bytes, PAIR_RESPONSE_LEN)?;
        let mut buf = bytes;
        Ok(Self {
            signature: read_array(&mut buf),
            contents: PairResponseContents {
                phone_pairing_pk: read_array(&mut buf),
                bike_pairing_pk: read_array(&mut buf),
            },
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAIR_RESPONSE_LEN);
        buf.put_slice(&self.signature);
        buf.put(self.contents.to_bytes());
        buf.freeze()
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequestContents {
    pub phone_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub bike_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub phone_identity_pk: [u8; PUBLIC_KEY_LEN],
    pub phone_ephemeral_pk: [u8; PUBLIC_KEY_LEN],
}

impl SessionRequestContents {
    /// The exact bytes covered by the phone identity signature.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SESSION_REQUEST_CONTENTS_LEN);
        buf.put_slice(&self.phone_pairing_pk);
        buf.put_slice(&self.bike_pairing_pk);
        buf.put_slice(&self.phone_identity_pk);
        buf.put_slice(&self.phone_ephemeral_pk);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub signature: [u8; SIGNATURE_LEN],
    pub contents: SessionRequestContents,
}

impl SessionRequest {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("session request", bytes, SESSION_REQUEST_LEN)?;
        let mut buf = bytes;
        Ok(Self {
            signature: read_array(&mut buf),
            contents: SessionRequestContents {
                phone_pairing_pk: read_array(&mut buf),
                bike_pairing_pk: read_array(&mut buf),
                phone_identity_pk: read_array(&mut buf),
                phone_ephemeral_pk: read_array(&mut buf),
            },
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SESSION_REQUEST_LEN);
        buf.put_slice(&self.signature);
        buf.put(self.contents.to_bytes());
        buf.freeze()
    }
}

/// Never carries the derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponseContents {
    pub ephemeral_pk: [u8; PUBLIC_KEY_LEN],
    pub session_id: [u8; SESSION_ID_LEN],
}

impl SessionResponseContents {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SESSION_RESPONSE_CONTENTS_LEN);
        buf.put_slice(&self.ephemeral_pk);
        buf.put_slice(&self.session_id);
        buf.freeze()
    }
}

/// Signed with the bike identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub signature: [u8; SIGNATURE_LEN],
    pub contents: SessionResponseContents,
}

impl SessionResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("session response", bytes, SESSION_RESPONSE_LEN)?;
        let mut buf = bytes;
        Ok(Self {
            signature: read_array(&mut buf),
            contents: SessionResponseContents {
                ephemeral_pk: read_array(&mut buf),
                session_id: read_array(&mut buf),
            },
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SESSION_RESPONSE_LEN);
        buf.put_slice(&self.signature);
        buf.put(self.contents.to_bytes());
        buf.freeze()
    }
}

// ============================================================================
// Secure channel
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    pub mac: [u8; FRAME_MAC_LEN],
    pub nonce: [u8; FRAME_NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SecureFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(WireError::Truncated {
                minimum: FRAME_OVERHEAD,
                actual: bytes.len(),
            });
        }
        let mut buf = bytes;
        let mac = read_array(&mut buf);
        let nonce = read_array(&mut buf);
        Ok(Self {
            mac,
            nonce,
            ciphertext: buf.to_vec(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + self.ciphertext.len());
        buf.put_slice(&self.mac);
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
        buf.freeze()
    }
}
