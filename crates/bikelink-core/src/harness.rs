//! Simulated server and phone for exercising the bike side end to end.
//!
//! `TestServer` authorises pairings the way the backend does; `TestPhone`
//! holds the phone's identity, pairing and ephemeral keys and mirrors the
//! bike's key schedule.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use zeroize::Zeroizing;

use bikelink_crypto::utils::constant_time_compare_array;
use bikelink_crypto::{xeddsa, CryptoError, KeyPair, SIGNATURE_LEN};

use crate::channel;
use crate::config::DEFAULT_MAX_COMMAND_LEN;
use crate::errors::LinkError;
use crate::session::{derive_session_key, SessionContext};
use crate::types::Clock;
use crate::wire::{
    PairRequest, PairRequestContents, PairResponse, SessionRequest, SessionRequestContents,
    SessionResponse, Validity, WireError, PUBLIC_KEY_LEN,
};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("phone has not completed pairing")]
    NotPaired,
    #[error("no session request outstanding")]
    NoSessionRequest,
    #[error("{0} does not match what the phone sent")]
    Mismatch(&'static str),
    #[error("{0} signature does not verify")]
    BadSignature(&'static str),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Clock pinned to a settable instant.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    pub fn new(now_unix: u64) -> Self {
        Self {
            now: AtomicU64::new(now_unix),
        }
    }

    pub fn set(&self, now_unix: u64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Backend that authorises pairings.
#[derive(Debug)]
pub struct TestServer {
    keys: KeyPair,
}

impl TestServer {
    pub fn new() -> Result<Self, HarnessError> {
        Ok(Self {
            keys: KeyPair::generate()?,
        })
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.keys.public()
    }

    /// Signed `PairRequest` letting `phone` pair with the given bike.
    pub fn authorise(
        &self,
        phone: &TestPhone,
        bike_identity_pk: &[u8; PUBLIC_KEY_LEN],
        validity: Validity,
    ) -> Result<Bytes, HarnessError> {
        let contents = PairRequestContents {
            bike_identity_pk: *bike_identity_pk,
            phone_identity_pk: *phone.identity_public(),
            phone_pairing_pk: *phone.pairing_public(),
            validity,
        };
        let signature = self.keys.sign(&contents.to_bytes())?;
        Ok(PairRequest {
            signature,
            contents,
        }
        .encode())
    }
}

/// Phone side of the protocol.
#[derive(Debug)]
pub struct TestPhone {
    identity: KeyPair,
    pairing: KeyPair,
    bike_identity_pk: Option<[u8; PUBLIC_KEY_LEN]>,
    bike_pairing_pk: Option<[u8; PUBLIC_KEY_LEN]>,
    ephemeral: Option<KeyPair>,
}

impl TestPhone {
    pub fn new() -> Result<Self, HarnessError> {
        Ok(Self {
            identity: KeyPair::generate()?,
            pairing: KeyPair::generate()?,
            bike_identity_pk: None,
            bike_pairing_pk: None,
            ephemeral: None,
        })
    }

    pub fn identity_public(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.identity.public()
    }

    pub fn pairing_public(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.pairing.public()
    }

    pub fn bike_pairing_public(&self) -> Option<&[u8; PUBLIC_KEY_LEN]> {
        self.bike_pairing_pk.as_ref()
    }

    pub fn ephemeral_public(&self) -> Option<&[u8; PUBLIC_KEY_LEN]> {
        self.ephemeral.as_ref().map(KeyPair::public)
    }

    pub fn sign_as_identity(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], HarnessError> {
        Ok(self.identity.sign(message)?)
    }

    /// Check the bike's answer to the pair request this phone forwarded and
    /// remember the new bike pairing key.
    pub fn accept_pair_response(
        &mut self,
        request: &[u8],
        response: &[u8],
    ) -> Result<(), HarnessError> {
        let request = PairRequest::decode(request)?;
        if !constant_time_compare_array(
            &request.contents.phone_identity_pk,
            self.identity.public(),
        ) {
            return Err(HarnessError::Mismatch("pair request identity"));
        }

        let response = PairResponse::decode(response)?;
        if !constant_time_compare_array(
            &response.contents.phone_pairing_pk,
            self.pairing.public(),
        ) {
            return Err(HarnessError::Mismatch("echoed pairing key"));
        }
        if !xeddsa::verify(
            &response.contents.bike_pairing_pk,
            &response.contents.to_bytes(),
            &response.signature,
        ) {
            return Err(HarnessError::BadSignature("pair response"));
        }

        self.bike_identity_pk = Some(request.contents.bike_identity_pk);
        self.bike_pairing_pk = Some(response.contents.bike_pairing_pk);
        Ok(())
    }

    /// Build a signed `SessionRequest` with a fresh ephemeral key.
    pub fn session_request(&mut self) -> Result<Bytes, HarnessError> {
        let bike_pairing_pk = self.bike_pairing_pk.ok_or(HarnessError::NotPaired)?;
        let ephemeral = KeyPair::generate()?;
        let contents = SessionRequestContents {
            phone_pairing_pk: *self.pairing.public(),
            bike_pairing_pk,
            phone_identity_pk: *self.identity.public(),
            phone_ephemeral_pk: *ephemeral.public(),
        };
        let signature = self.identity.sign(&contents.to_bytes())?;
        self.ephemeral = Some(ephemeral);
        Ok(SessionRequest {
            signature,
            contents,
        }
        .encode())
    }

    /// Verify the bike's session response and derive the phone-side context.
    pub fn accept_session_response(
        &mut self,
        response: &[u8],
    ) -> Result<SessionContext, HarnessError> {
        let bike_identity_pk = self.bike_identity_pk.ok_or(HarnessError::NotPaired)?;
        let bike_pairing_pk = self.bike_pairing_pk.ok_or(HarnessError::NotPaired)?;
        let ephemeral = self.ephemeral.take().ok_or(HarnessError::NoSessionRequest)?;

        let response = SessionResponse::decode(response)?;
        if !constant_time_compare_array(&response.contents.ephemeral_pk, ephemeral.public()) {
            return Err(HarnessError::Mismatch("echoed ephemeral key"));
        }
        if !xeddsa::verify(
            &bike_identity_pk,
            &response.contents.to_bytes(),
            &response.signature,
        ) {
            return Err(HarnessError::BadSignature("session response"));
        }

        let dh1 = self.identity.diffie_hellman(&bike_identity_pk)?;
        let dh2 = self.pairing.diffie_hellman(&bike_identity_pk)?;
        let dh3 = ephemeral.diffie_hellman(&bike_identity_pk)?;
        let dh4 = ephemeral.diffie_hellman(&bike_pairing_pk)?;
        let key = derive_session_key(&dh1, &dh2, &dh3, &dh4);

        Ok(SessionContext::new(
            *self.identity.public(),
            *ephemeral.public(),
            response.contents.session_id,
            &key,
        ))
    }

    pub fn seal(&self, session: &SessionContext, command: &[u8]) -> Result<Bytes, HarnessError> {
        Ok(channel::encrypt(session, command, DEFAULT_MAX_COMMAND_LEN)?)
    }

    pub fn open(
        &self,
        session: &SessionContext,
        frame: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, HarnessError> {
        Ok(channel::decrypt(session, frame, DEFAULT_MAX_COMMAND_LEN)?)
    }
}
