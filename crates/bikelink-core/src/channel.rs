//! Secure channel: XChaCha20-Poly1305 over a session key, with a fresh
//! random nonce per frame and the session id as associated data.
//!
//! Frame layout is `mac(16) ‖ nonce(24) ‖ ciphertext`. Frames carry no
//! counter, so a captured frame replays successfully within its session.

use bytes::Bytes;
use zeroize::Zeroizing;

use bikelink_crypto::primitives::{aead_open, aead_seal, random_bytes};

use crate::errors::LinkError;
use crate::session::SessionContext;
use crate::wire::{SecureFrame, FRAME_NONCE_LEN, FRAME_OVERHEAD};

/// Seal `plaintext` into a wire frame.
pub fn encrypt(
    session: &SessionContext,
    plaintext: &[u8],
    max_command_len: usize,
) -> Result<Bytes, LinkError> {
    if plaintext.len() > max_command_len {
        return Err(LinkError::MalformedRequest(format!(
            "command of {} bytes exceeds limit of {}",
            plaintext.len(),
            max_command_len
        )));
    }

    let nonce = random_bytes::<FRAME_NONCE_LEN>()?;
    let (ciphertext, mac) = aead_seal(
        session.derived_key(),
        &nonce,
        session.session_id(),
        plaintext,
    )?;
    Ok(SecureFrame {
        mac,
        nonce,
        ciphertext,
    }
    .encode())
}

/// Open a wire frame. Every failure is reported as `AuthenticationFailed`.
pub fn decrypt(
    session: &SessionContext,
    frame: &[u8],
    max_command_len: usize,
) -> Result<Zeroizing<Vec<u8>>, LinkError> {
    if frame.len() > max_command_len.saturating_add(FRAME_OVERHEAD) {
        return Err(LinkError::AuthenticationFailed);
    }
    let frame = SecureFrame::decode(frame).map_err(|_| LinkError::AuthenticationFailed)?;
    aead_open(
        session.derived_key(),
        &frame.nonce,
        session.session_id(),
        &frame.ciphertext,
        &frame.mac,
    )
    .map_err(|_| LinkError::AuthenticationFailed)
}
