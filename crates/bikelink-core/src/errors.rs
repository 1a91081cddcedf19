//! Error taxonomy for the protocol core.
//!
//! Every operation returns one of these kinds explicitly. Each kind carries a
//! [`Disposition`] telling the connection layer what to do with the link, and
//! maps to a one-byte [`ErrorCode`] that is safe to send to the phone: the code
//! never reveals internal detail such as which check failed or which blob is
//! corrupt.

use thiserror::Error;

use bikelink_crypto::CryptoError;

use crate::storage::StoreError;
use crate::types::{ConnectionState, RequestKind};
use crate::wire::WireError;

/// Protocol-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Wrong length or shape; nothing was changed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Pair request not authorised by the trusted server for this bike.
    #[error("pairing request is not authorised")]
    UntrustedPairingRequest,

    /// Session request signature does not verify under the phone identity.
    #[error("session request signature is invalid")]
    InvalidSessionSignature,

    /// No pairing record matches the session request.
    #[error("phone is not paired")]
    NotPaired,

    /// Secure command received without an established session.
    #[error("no session established")]
    SessionNotEstablished,

    /// All pairing slots are taken by other phones.
    #[error("pairing table is full")]
    PairingTableFull,

    /// AEAD tag did not verify. Deliberately carries no reason.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Persisted identity or trust data is unusable.
    #[error("persisted state is corrupt: {0}")]
    StorageCorrupt(String),

    /// Pairing validity window does not cover the current time.
    #[error("pairing validity window has expired")]
    PairingExpired,

    /// Request type is not legal in the current connection state.
    #[error("{request:?} request not allowed in {state:?} state")]
    OutOfOrder {
        state: ConnectionState,
        request: RequestKind,
    },

    /// Pairing or session setup did not finish within the supervisory bound.
    #[error("negotiation timed out")]
    Timeout,

    /// Storage backend failure (I/O).
    #[error("storage error: {0}")]
    Storage(String),

    /// RNG or other primitive failure.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

/// What the connection layer must do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reject the request, keep the link and its state.
    Reject,
    /// Drop the link; the connection falls back to `Unpaired`.
    Disconnect,
    /// The device cannot continue safely.
    Halt,
}

/// Wire-safe error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    MalformedRequest = 0x01,
    Unauthorized = 0x02,
    NotPaired = 0x03,
    SessionNotEstablished = 0x04,
    PairingTableFull = 0x05,
    AuthenticationFailed = 0x06,
    PairingExpired = 0x07,
    OutOfOrder = 0x08,
    Timeout = 0x09,
    Internal = 0xFF,
}

impl ErrorCode {
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl LinkError {
    pub fn disposition(&self) -> Disposition {
        match self {
            LinkError::MalformedRequest(_) | LinkError::PairingTableFull => Disposition::Reject,
            LinkError::UntrustedPairingRequest
            | LinkError::InvalidSessionSignature
            | LinkError::NotPaired
            | LinkError::SessionNotEstablished
            | LinkError::AuthenticationFailed
            | LinkError::PairingExpired
            | LinkError::OutOfOrder { .. }
            | LinkError::Timeout
            | LinkError::Storage(_) => Disposition::Disconnect,
            LinkError::StorageCorrupt(_) | LinkError::Crypto(_) => Disposition::Halt,
        }
    }

    /// Signature or MAC failures, as opposed to ordering or capacity errors.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            LinkError::UntrustedPairingRequest
                | LinkError::InvalidSessionSignature
                | LinkError::AuthenticationFailed
        )
    }

    /// Convert to the code sent back over the link.
    /// Signature failures share one code so the phone cannot tell them apart.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LinkError::MalformedRequest(_) => ErrorCode::MalformedRequest,
            LinkError::UntrustedPairingRequest | LinkError::InvalidSessionSignature => {
                ErrorCode::Unauthorized
            }
            LinkError::NotPaired => ErrorCode::NotPaired,
            LinkError::SessionNotEstablished => ErrorCode::SessionNotEstablished,
            LinkError::PairingTableFull => ErrorCode::PairingTableFull,
            LinkError::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            LinkError::PairingExpired => ErrorCode::PairingExpired,
            LinkError::OutOfOrder { .. } => ErrorCode::OutOfOrder,
            LinkError::Timeout => ErrorCode::Timeout,
            LinkError::StorageCorrupt(_) | LinkError::Storage(_) | LinkError::Crypto(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl From<WireError> for LinkError {
    fn from(e: WireError) -> Self {
        LinkError::MalformedRequest(e.to_string())
    }
}

impl From<CryptoError> for LinkError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WeakSharedSecret => {
                LinkError::MalformedRequest("low-order public key".to_string())
            }
            CryptoError::AuthenticationFailed => LinkError::AuthenticationFailed,
            other => LinkError::Crypto(other),
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TableFull => LinkError::PairingTableFull,
            StoreError::ZeroIdentity => LinkError::MalformedRequest(e.to_string()),
            StoreError::NotProvisioned
            | StoreError::AlreadyProvisioned
            | StoreError::Corrupt { .. } => LinkError::StorageCorrupt(e.to_string()),
            StoreError::Io(msg) => LinkError::Storage(msg),
            StoreError::Crypto(inner) => LinkError::Crypto(inner),
        }
    }
}
