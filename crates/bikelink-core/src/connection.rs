//! Connection state machine.
//!
//! One `Connection` per transport link. It decides which request types are
//! legal in the current state, runs the matching protocol step and applies
//! the error's [`Disposition`]: rejected requests leave the state alone,
//! anything else drops back to `Unpaired` and wipes the session. Persisted
//! pairing records are never touched by a reset.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use bikelink_crypto::utils::constant_time_compare_array;

use crate::channel;
use crate::config::LinkConfig;
use crate::errors::{Disposition, LinkError};
use crate::pairing::handle_pair_request;
use crate::session::{handle_session_request, SessionContext};
use crate::store::TrustStore;
use crate::types::{key_prefix, Clock, ConnectionState, RequestKind};
use crate::wire::{SessionRequest, PUBLIC_KEY_LEN};

/// Trust store shared between the connection and maintenance paths.
pub type SharedStore = Arc<Mutex<TrustStore>>;

/// What a successfully handled request produced.
#[derive(Debug)]
pub enum Inbound {
    /// Protocol response to send back as-is.
    Reply(Bytes),
    /// Decrypted application command.
    Command(Zeroizing<Vec<u8>>),
}

pub struct Connection {
    store: SharedStore,
    config: LinkConfig,
    clock: Arc<dyn Clock>,
    state: ConnectionState,
    session: Option<SessionContext>,
    /// Phone that paired on this link, if any.
    peer: Option<[u8; PUBLIC_KEY_LEN]>,
    negotiation_started: Option<Instant>,
}

impl Connection {
    pub fn new(store: SharedStore, config: LinkConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            state: ConnectionState::Unpaired,
            session: None,
            peer: None,
            negotiation_started: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// A phone connected; starts the supervisory timer.
    pub fn connect(&mut self, now: Instant) {
        self.reset();
        self.negotiation_started = Some(now);
        debug!("link connected");
    }

    /// Transport dropped or the link must be torn down.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Unpaired {
            info!(from = ?self.state, "link reset to unpaired");
        }
        self.reset();
    }

    fn reset(&mut self) {
        // Dropping the context zeroizes it.
        self.session = None;
        self.peer = None;
        self.state = ConnectionState::Unpaired;
        self.negotiation_started = None;
    }

    /// Fails with `Timeout` and resets when setup has not reached
    /// `SessionCreated` within the configured bound.
    pub fn check_timeout(&mut self, now: Instant) -> Result<(), LinkError> {
        let (Some(started), Some(limit)) = (self.negotiation_started, self.config.pairing_timeout())
        else {
            return Ok(());
        };
        if self.state != ConnectionState::SessionCreated
            && now.saturating_duration_since(started) > limit
        {
            warn!(state = ?self.state, "negotiation timed out");
            self.reset();
            return Err(LinkError::Timeout);
        }
        Ok(())
    }

    /// Handle one request from the transport.
    pub fn handle(&mut self, kind: RequestKind, bytes: &[u8]) -> Result<Inbound, LinkError> {
        let result = match kind {
            RequestKind::Pair => self.on_pair(bytes),
            RequestKind::Session => self.on_session(bytes),
            RequestKind::Command => self.on_command(bytes),
        };

        if let Err(err) = &result {
            match err.disposition() {
                Disposition::Reject => {
                    debug!(?kind, error = %err, "request rejected");
                }
                Disposition::Disconnect | Disposition::Halt => {
                    warn!(
                        ?kind,
                        state = ?self.state,
                        error = %err,
                        "request failed, dropping link"
                    );
                    self.reset();
                }
            }
        }
        result
    }

    /// Encrypt an application reply for the phone.
    pub fn seal_reply(&self, plaintext: &[u8]) -> Result<Bytes, LinkError> {
        let session = self.session.as_ref().ok_or(LinkError::SessionNotEstablished)?;
        channel::encrypt(session, plaintext, self.config.max_command_len)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, TrustStore>, LinkError> {
        self.store
            .lock()
            .map_err(|_| LinkError::StorageCorrupt("trust store lock poisoned".to_string()))
    }

    fn on_pair(&mut self, bytes: &[u8]) -> Result<Inbound, LinkError> {
        if self.state != ConnectionState::Unpaired {
            return Err(LinkError::OutOfOrder {
                state: self.state,
                request: RequestKind::Pair,
            });
        }

        let now = self.clock.now_unix();
        let (outcome, peer) = {
            let mut store = self.lock_store()?;
            let outcome = handle_pair_request(&mut store, &self.config, now, bytes)?;
            let record = store.pairing(outcome.slot).ok_or(LinkError::NotPaired)?;
            let peer = record.phone_identity_pk;
            (outcome, peer)
        };

        self.peer = Some(peer);
        self.state = ConnectionState::Paired;
        debug!(slot = outcome.slot, "state -> Paired");
        Ok(Inbound::Reply(outcome.response.encode()))
    }

    fn on_session(&mut self, bytes: &[u8]) -> Result<Inbound, LinkError> {
        let resumed = match self.state {
            ConnectionState::Paired => false,
            ConnectionState::Unpaired => {
                self.resume(bytes)?;
                true
            }
            ConnectionState::SessionCreated => {
                return Err(LinkError::OutOfOrder {
                    state: self.state,
                    request: RequestKind::Session,
                })
            }
        };

        let result = self.establish(bytes);
        if resumed && result.is_err() {
            // A resumed link is only Paired once the session is authenticated.
            self.state = ConnectionState::Unpaired;
        }
        result
    }

    fn establish(&mut self, bytes: &[u8]) -> Result<Inbound, LinkError> {
        let now = self.clock.now_unix();
        let established = {
            let store = self.lock_store()?;
            handle_session_request(&store, &self.config, now, bytes)?
        };

        if let Some(peer) = &self.peer {
            if !constant_time_compare_array(peer, established.context.phone_identity_pk()) {
                warn!(
                    phone = %key_prefix(established.context.phone_identity_pk()),
                    "session request on a link paired by another phone"
                );
                return Err(LinkError::NotPaired);
            }
        }

        let reply = established.response.encode();
        self.peer = Some(*established.context.phone_identity_pk());
        self.session = Some(established.context);
        self.state = ConnectionState::SessionCreated;
        self.negotiation_started = None;
        debug!(slot = established.slot, "state -> SessionCreated");
        Ok(Inbound::Reply(reply))
    }

    /// Recognise a phone paired on an earlier link.
    fn resume(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.config.allow_session_resume {
            return Err(LinkError::NotPaired);
        }
        let request = SessionRequest::decode(bytes)?;
        let known = self
            .lock_store()?
            .find_pairing_by_bike_pairing_pk(&request.contents.bike_pairing_pk)
            .is_some();
        if !known {
            return Err(LinkError::NotPaired);
        }
        self.state = ConnectionState::Paired;
        debug!("state -> Paired (resumed)");
        Ok(())
    }

    fn on_command(&mut self, bytes: &[u8]) -> Result<Inbound, LinkError> {
        let session = match (&self.state, &self.session) {
            (ConnectionState::SessionCreated, Some(session)) => session,
            _ => return Err(LinkError::SessionNotEstablished),
        };
        let plaintext = channel::decrypt(session, bytes, self.config.max_command_len)?;
        Ok(Inbound::Command(plaintext))
    }
}
