//! Session protocol: authenticate a phone-signed session request, run the
//! four-way Diffie-Hellman and derive the per-session channel key.

use std::fmt;

use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use bikelink_crypto::primitives::{hash_kdf, random_bytes, KEY_LEN};
use bikelink_crypto::utils::constant_time_compare_array;
use bikelink_crypto::xeddsa;

use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::store::TrustStore;
use crate::types::key_prefix;
use crate::wire::{
    SessionRequest, SessionResponse, SessionResponseContents, PUBLIC_KEY_LEN, SESSION_ID_LEN,
};

/// Volatile state of an established session. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionContext {
    phone_identity_pk: [u8; PUBLIC_KEY_LEN],
    phone_ephemeral_pk: [u8; PUBLIC_KEY_LEN],
    session_id: [u8; SESSION_ID_LEN],
    derived_key: [u8; KEY_LEN],
}

impl SessionContext {
    pub fn new(
        phone_identity_pk: [u8; PUBLIC_KEY_LEN],
        phone_ephemeral_pk: [u8; PUBLIC_KEY_LEN],
        session_id: [u8; SESSION_ID_LEN],
        derived_key: &[u8; KEY_LEN],
    ) -> Self {
        Self {
            phone_identity_pk,
            phone_ephemeral_pk,
            session_id,
            derived_key: *derived_key,
        }
    }

    pub fn phone_identity_pk(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.phone_identity_pk
    }

    pub fn phone_ephemeral_pk(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.phone_ephemeral_pk
    }

    /// Associated data for every secure frame of this session.
    pub fn session_id(&self) -> &[u8; SESSION_ID_LEN] {
        &self.session_id
    }

    pub(crate) fn derived_key(&self) -> &[u8; KEY_LEN] {
        &self.derived_key
    }

    /// Constant-time check whether two contexts hold the same channel key.
    pub fn shares_key_with(&self, other: &SessionContext) -> bool {
        constant_time_compare_array(&self.derived_key, &other.derived_key)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("phone_identity", &key_prefix(&self.phone_identity_pk))
            .field("session_id", &key_prefix(&self.session_id))
            .finish_non_exhaustive()
    }
}

/// BLAKE2b-256 over the four DH outputs, in this exact order:
/// identity/identity, identity/phone-pairing, identity/ephemeral,
/// bike-pairing/ephemeral.
pub fn derive_session_key(
    dh1: &[u8; KEY_LEN],
    dh2: &[u8; KEY_LEN],
    dh3: &[u8; KEY_LEN],
    dh4: &[u8; KEY_LEN],
) -> Zeroizing<[u8; KEY_LEN]> {
    hash_kdf(&[&dh1[..], &dh2[..], &dh3[..], &dh4[..]])
}

/// A session ready to be committed by the connection.
#[derive(Debug)]
pub struct SessionEstablished {
    pub slot: usize,
    pub response: SessionResponse,
    pub context: SessionContext,
}

/// Handle a raw `SessionRequest`.
///
/// Nothing is committed here: the caller installs `context` only after the
/// response has been handed to the transport.
pub fn handle_session_request(
    store: &TrustStore,
    config: &LinkConfig,
    now_unix: u64,
    bytes: &[u8],
) -> Result<SessionEstablished, LinkError> {
    let request = SessionRequest::decode(bytes)?;
    let contents = &request.contents;

    let slot = store
        .find_pairing_by_bike_pairing_pk(&contents.bike_pairing_pk)
        .ok_or_else(|| {
            warn!(
                bike_pairing = %key_prefix(&contents.bike_pairing_pk),
                "session request for unknown pairing key"
            );
            LinkError::NotPaired
        })?;
    let record = store.pairing(slot).ok_or(LinkError::NotPaired)?;

    // The pairing key is public; the request must come from the phone it was issued to.
    let same_identity =
        constant_time_compare_array(&record.phone_identity_pk, &contents.phone_identity_pk);
    let same_pairing =
        constant_time_compare_array(&record.phone_pairing_pk, &contents.phone_pairing_pk);
    if !(same_identity & same_pairing) {
        warn!(slot, "session request keys do not match the pairing record");
        return Err(LinkError::NotPaired);
    }

    if !xeddsa::verify(
        &contents.phone_identity_pk,
        &contents.to_bytes(),
        &request.signature,
    ) {
        warn!(
            phone = %key_prefix(&contents.phone_identity_pk),
            "invalid session signature"
        );
        return Err(LinkError::InvalidSessionSignature);
    }

    if config.enforce_validity_window && !record.validity.contains(now_unix) {
        warn!(
            slot,
            start = record.validity.start,
            end = record.validity.end,
            now = now_unix,
            "pairing outside its validity window"
        );
        return Err(LinkError::PairingExpired);
    }

    let identity = store.identity();
    let dh1 = identity.diffie_hellman(&contents.phone_identity_pk)?;
    let dh2 = identity.diffie_hellman(&contents.phone_pairing_pk)?;
    let dh3 = identity.diffie_hellman(&contents.phone_ephemeral_pk)?;
    let dh4 = record
        .bike_pairing
        .diffie_hellman(&contents.phone_ephemeral_pk)?;
    let derived_key = derive_session_key(&dh1, &dh2, &dh3, &dh4);

    let session_id = random_bytes::<SESSION_ID_LEN>()?;
    let response_contents = SessionResponseContents {
        ephemeral_pk: contents.phone_ephemeral_pk,
        session_id,
    };
    let signature = identity.sign(&response_contents.to_bytes())?;

    let context = SessionContext::new(
        contents.phone_identity_pk,
        contents.phone_ephemeral_pk,
        session_id,
        &derived_key,
    );

    info!(
        slot,
        phone = %key_prefix(&contents.phone_identity_pk),
        session = %key_prefix(&session_id),
        "session established"
    );

    Ok(SessionEstablished {
        slot,
        response: SessionResponse {
            signature,
            contents: response_contents,
        },
        context,
    })
}
