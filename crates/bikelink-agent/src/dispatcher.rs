//! Message-queue dispatcher.
//!
//! Bridges the transport's event queue to one [`Connection`]. Events are
//! handled strictly in arrival order; the supervisory timer is polled on a
//! fixed interval between events.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use bikelink_core::{Connection, Disposition, ErrorCode, Inbound, LinkError, RequestKind};

/// What the transport delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Request(RequestKind, Bytes),
    Disconnected,
}

/// What the dispatcher asks the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    Send(Bytes),
    /// Tell the phone why its request failed.
    Error(ErrorCode),
    /// Close the link.
    Drop,
}

/// Application side of the secure channel.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a decrypted command. A returned reply is sealed and sent.
    async fn handle(&self, command: &[u8]) -> Option<Vec<u8>>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("link halted: {0}")]
    Halted(LinkError),
    #[error("transport action queue closed")]
    ActionsClosed,
}

pub struct Dispatcher<H> {
    connection: Connection,
    handler: H,
    events: mpsc::Receiver<TransportEvent>,
    actions: mpsc::Sender<TransportAction>,
    tick: Duration,
}

impl<H: CommandHandler> Dispatcher<H> {
    pub fn new(
        connection: Connection,
        handler: H,
        events: mpsc::Receiver<TransportEvent>,
        actions: mpsc::Sender<TransportAction>,
        tick: Duration,
    ) -> Self {
        Self {
            connection,
            handler,
            events,
            actions,
            tick,
        }
    }

    /// Run until the event queue closes (`Ok`) or an error halts the device.
    pub async fn run(mut self) -> Result<(), DispatchError> {
        let mut timer = tokio::time::interval(self.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.tick.as_millis() as u64, "dispatcher started");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event).await?,
                    None => {
                        info!("transport event queue closed, dispatcher stopping");
                        self.connection.disconnect();
                        return Ok(());
                    }
                },
                _ = timer.tick() => self.on_tick().await?,
            }
        }
    }

    async fn on_event(&mut self, event: TransportEvent) -> Result<(), DispatchError> {
        match event {
            TransportEvent::Connected => {
                self.connection.connect(Instant::now().into_std());
                Ok(())
            }
            TransportEvent::Disconnected => {
                self.connection.disconnect();
                Ok(())
            }
            TransportEvent::Request(kind, bytes) => self.on_request(kind, &bytes).await,
        }
    }

    async fn on_request(&mut self, kind: RequestKind, bytes: &[u8]) -> Result<(), DispatchError> {
        debug!(?kind, len = bytes.len(), "request");
        match self.connection.handle(kind, bytes) {
            Ok(Inbound::Reply(reply)) => self.send(TransportAction::Send(reply)).await,
            Ok(Inbound::Command(command)) => {
                let Some(reply) = self.handler.handle(&command).await else {
                    return Ok(());
                };
                match self.connection.seal_reply(&reply) {
                    Ok(frame) => self.send(TransportAction::Send(frame)).await,
                    Err(err) => {
                        warn!(error = %err, "command reply not sent");
                        Ok(())
                    }
                }
            }
            Err(err) => self.on_error(err).await,
        }
    }

    async fn on_tick(&mut self) -> Result<(), DispatchError> {
        match self.connection.check_timeout(Instant::now().into_std()) {
            Ok(()) => Ok(()),
            Err(err) => self.on_error(err).await,
        }
    }

    /// The connection has already reset itself; this tells the transport.
    async fn on_error(&mut self, err: LinkError) -> Result<(), DispatchError> {
        self.send(TransportAction::Error(err.error_code())).await?;
        match err.disposition() {
            Disposition::Reject => Ok(()),
            Disposition::Disconnect => self.send(TransportAction::Drop).await,
            Disposition::Halt => {
                error!(error = %err, "halting");
                self.send(TransportAction::Drop).await?;
                Err(DispatchError::Halted(err))
            }
        }
    }

    async fn send(&self, action: TransportAction) -> Result<(), DispatchError> {
        self.actions
            .send(action)
            .await
            .map_err(|_| DispatchError::ActionsClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use bikelink_core::harness::{FixedClock, TestPhone, TestServer};
    use bikelink_core::wire::Validity;
    use bikelink_core::{LinkConfig, MemoryStorage, SessionContext, SharedStore, TrustStore};

    const NOW: u64 = 1_700_000_000;

    /// Replies with the command reversed.
    struct Reverse;

    #[async_trait]
    impl CommandHandler for Reverse {
        async fn handle(&self, command: &[u8]) -> Option<Vec<u8>> {
            Some(command.iter().rev().copied().collect())
        }
    }

    struct Harness {
        server: TestServer,
        identity: [u8; 32],
        store: SharedStore,
        events: mpsc::Sender<TransportEvent>,
        actions: mpsc::Receiver<TransportAction>,
        task: tokio::task::JoinHandle<Result<(), DispatchError>>,
    }

    fn start(config: LinkConfig) -> Harness {
        let server = TestServer::new().unwrap();
        let store =
            TrustStore::provision(MemoryStorage::new(), *server.public_key(), &config).unwrap();
        let identity = *store.identity().public();
        let store = Arc::new(Mutex::new(store));
        let connection = Connection::new(store.clone(), config, Arc::new(FixedClock::new(NOW)));

        let (events_tx, events_rx) = mpsc::channel(8);
        let (actions_tx, actions_rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(
            connection,
            Reverse,
            events_rx,
            actions_tx,
            Duration::from_millis(100),
        );
        Harness {
            server,
            identity,
            store,
            events: events_tx,
            actions: actions_rx,
            task: tokio::spawn(dispatcher.run()),
        }
    }

    impl Harness {
        async fn request(&mut self, kind: RequestKind, bytes: Bytes) -> TransportAction {
            self.events
                .send(TransportEvent::Request(kind, bytes))
                .await
                .unwrap();
            self.actions.recv().await.unwrap()
        }

        async fn establish(&mut self, phone: &mut TestPhone) -> SessionContext {
            self.events.send(TransportEvent::Connected).await.unwrap();
            let window = Validity {
                start: NOW - 1,
                end: NOW + 3_600,
            };
            let request = self.server.authorise(phone, &self.identity, window).unwrap();
            let TransportAction::Send(response) =
                self.request(RequestKind::Pair, request.clone()).await
            else {
                panic!("pairing failed");
            };
            phone.accept_pair_response(&request, &response).unwrap();

            let request = phone.session_request().unwrap();
            let TransportAction::Send(response) = self.request(RequestKind::Session, request).await
            else {
                panic!("session failed");
            };
            phone.accept_session_response(&response).unwrap()
        }
    }

    #[tokio::test]
    async fn test_commands_are_answered_through_the_handler() {
        let mut h = start(LinkConfig::default());
        let mut phone = TestPhone::new().unwrap();
        let session = h.establish(&mut phone).await;

        let commands: [&[u8]; 2] = [b"unlock", b"lights"];
        for command in commands {
            let frame = phone.seal(&session, command).unwrap();
            let TransportAction::Send(reply) = h.request(RequestKind::Command, frame).await else {
                panic!("expected a sealed reply");
            };
            let opened = phone.open(&session, &reply).unwrap();
            let expected: Vec<u8> = command.iter().rev().copied().collect();
            assert_eq!(opened.as_slice(), expected.as_slice());
        }

        drop(h.events);
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rejected_request_keeps_link() {
        let mut h = start(LinkConfig::default());
        h.events.send(TransportEvent::Connected).await.unwrap();

        let action = h
            .request(RequestKind::Pair, Bytes::from_static(b"short"))
            .await;
        assert_eq!(action, TransportAction::Error(ErrorCode::MalformedRequest));

        // A well-formed pairing still works on the same link
        let mut phone = TestPhone::new().unwrap();
        let _session = h.establish(&mut phone).await;
        assert_eq!(h.store.lock().unwrap().pairing_count(), 1);
    }

    #[tokio::test]
    async fn test_command_before_session_drops_link() {
        let mut h = start(LinkConfig::default());
        h.events.send(TransportEvent::Connected).await.unwrap();

        let action = h
            .request(RequestKind::Command, Bytes::from(vec![0u8; 64]))
            .await;
        assert_eq!(action, TransportAction::Error(ErrorCode::SessionNotEstablished));
        assert_eq!(h.actions.recv().await, Some(TransportAction::Drop));
    }

    #[tokio::test]
    async fn test_tampered_frame_drops_link() {
        let mut h = start(LinkConfig::default());
        let mut phone = TestPhone::new().unwrap();
        let session = h.establish(&mut phone).await;

        let mut frame = phone.seal(&session, b"unlock").unwrap().to_vec();
        frame[0] ^= 1;
        let action = h.request(RequestKind::Command, Bytes::from(frame)).await;
        assert_eq!(action, TransportAction::Error(ErrorCode::AuthenticationFailed));
        assert_eq!(h.actions.recv().await, Some(TransportAction::Drop));

        // The link is back to Unpaired, so commands are refused
        let frame = phone.seal(&session, b"unlock").unwrap();
        let action = h.request(RequestKind::Command, frame).await;
        assert_eq!(action, TransportAction::Error(ErrorCode::SessionNotEstablished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_negotiation_times_out() {
        let config = LinkConfig {
            pairing_timeout_secs: Some(5),
            ..LinkConfig::default()
        };
        let mut h = start(config);
        h.events.send(TransportEvent::Connected).await.unwrap();

        // Paused time auto-advances while the dispatcher idles on its timer
        assert_eq!(
            h.actions.recv().await,
            Some(TransportAction::Error(ErrorCode::Timeout))
        );
        assert_eq!(h.actions.recv().await, Some(TransportAction::Drop));
    }

    #[tokio::test]
    async fn test_poisoned_store_halts_dispatcher() {
        let mut h = start(LinkConfig::default());
        let store = h.store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = store.lock().unwrap();
            panic!("poison the store lock");
        })
        .join();

        let phone = TestPhone::new().unwrap();
        let window = Validity {
            start: NOW - 1,
            end: NOW + 3_600,
        };
        let request = h.server.authorise(&phone, &h.identity, window).unwrap();
        let action = h.request(RequestKind::Pair, request).await;
        assert_eq!(action, TransportAction::Error(ErrorCode::Internal));
        assert_eq!(h.actions.recv().await, Some(TransportAction::Drop));

        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(DispatchError::Halted(LinkError::StorageCorrupt(_)))
        ));
    }
}
