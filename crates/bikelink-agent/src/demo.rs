//! Loop-back demo: a simulated server and phone drive the real dispatcher
//! over in-process queues.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use bikelink_core::harness::{HarnessError, TestPhone, TestServer};
use bikelink_core::types::key_prefix;
use bikelink_core::wire::Validity;
use bikelink_core::{
    Clock, Connection, ErrorCode, MemoryStorage, RequestKind, StoreError, SystemClock, TrustStore,
};

use crate::config::AgentConfig;
use crate::dispatcher::{
    CommandHandler, DispatchError, Dispatcher, TransportAction, TransportEvent,
};

/// Commands the demo sends when none are given.
pub const DEFAULT_COMMANDS: [&str; 3] = ["unlock", "lights:on", "horn"];

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("harness: {0}")]
    Harness(#[from] HarnessError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("dispatcher: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("bike refused request with code {0:#04x}")]
    Refused(u8),
    #[error("bike dropped the link")]
    Dropped,
    #[error("reply to command {0} did not match")]
    WrongReply(usize),
    #[error("dispatcher task failed: {0}")]
    Join(String),
}

/// Acknowledges each command with `ok:` followed by the command.
pub struct AckHandler;

#[async_trait]
impl CommandHandler for AckHandler {
    async fn handle(&self, command: &[u8]) -> Option<Vec<u8>> {
        info!(len = command.len(), "command received");
        Some(ack(command))
    }
}

fn ack(command: &[u8]) -> Vec<u8> {
    let mut reply = b"ok:".to_vec();
    reply.extend_from_slice(command);
    reply
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub pairings: usize,
    pub commands_acknowledged: usize,
}

async fn exchange(
    events: &mpsc::Sender<TransportEvent>,
    actions: &mut mpsc::Receiver<TransportAction>,
    kind: RequestKind,
    bytes: Bytes,
) -> Result<Bytes, DemoError> {
    events
        .send(TransportEvent::Request(kind, bytes))
        .await
        .map_err(|_| DemoError::Dropped)?;
    match actions.recv().await {
        Some(TransportAction::Send(reply)) => Ok(reply),
        Some(TransportAction::Error(code)) => Err(DemoError::Refused(ErrorCode::to_byte(code))),
        Some(TransportAction::Drop) | None => Err(DemoError::Dropped),
    }
}

/// Provision an in-memory bike, pair a phone, open a session and send
/// `commands` through the dispatcher, checking every reply.
pub async fn run(config: &AgentConfig, commands: &[String]) -> Result<DemoReport, DemoError> {
    let clock = Arc::new(SystemClock);
    let now = clock.now_unix();

    let server = TestServer::new()?;
    let store = TrustStore::provision(MemoryStorage::new(), *server.public_key(), &config.link)?;
    let bike_identity = *store.identity().public();
    info!(bike = %key_prefix(&bike_identity), "demo bike provisioned");
    let store = Arc::new(Mutex::new(store));

    let (events, events_rx) = mpsc::channel(config.queue_depth);
    let (actions_tx, mut actions) = mpsc::channel(config.queue_depth);
    let connection = Connection::new(store.clone(), config.link.clone(), clock);
    let task = tokio::spawn(
        Dispatcher::new(
            connection,
            AckHandler,
            events_rx,
            actions_tx,
            Duration::from_millis(config.timer_interval_ms),
        )
        .run(),
    );

    let mut phone = TestPhone::new()?;
    events
        .send(TransportEvent::Connected)
        .await
        .map_err(|_| DemoError::Dropped)?;
    info!(phone = %key_prefix(phone.identity_public()), "phone connected");

    let window = Validity {
        start: now.saturating_sub(60),
        end: now + 3_600,
    };
    let request = server.authorise(&phone, &bike_identity, window)?;
    let response = exchange(&events, &mut actions, RequestKind::Pair, request.clone()).await?;
    phone.accept_pair_response(&request, &response)?;
    info!("pairing complete");

    let request = phone.session_request()?;
    let response = exchange(&events, &mut actions, RequestKind::Session, request).await?;
    let session = phone.accept_session_response(&response)?;
    info!("session established");

    let mut acknowledged = 0;
    for (i, command) in commands.iter().enumerate() {
        let frame = phone.seal(&session, command.as_bytes())?;
        let reply = exchange(&events, &mut actions, RequestKind::Command, frame).await?;
        let opened = phone.open(&session, &reply)?;
        if opened.as_slice() != ack(command.as_bytes()).as_slice() {
            return Err(DemoError::WrongReply(i));
        }
        acknowledged += 1;
        info!(index = i, "command acknowledged");
    }

    events
        .send(TransportEvent::Disconnected)
        .await
        .map_err(|_| DemoError::Dropped)?;
    drop(events);
    task.await.map_err(|e| DemoError::Join(e.to_string()))??;

    let pairings = store
        .lock()
        .map(|s| s.pairing_count())
        .map_err(|_| DemoError::Join("trust store lock poisoned".to_string()))?;
    info!(acknowledged, pairings, "demo finished");
    Ok(DemoReport {
        pairings,
        commands_acknowledged: acknowledged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikelink_core::LinkConfig;

    #[tokio::test]
    async fn test_demo_runs_end_to_end() {
        let commands: Vec<String> = DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect();
        let report = run(&AgentConfig::default(), &commands).await.unwrap();
        assert_eq!(
            report,
            DemoReport {
                pairings: 1,
                commands_acknowledged: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_demo_reports_oversized_command() {
        let config = AgentConfig {
            link: LinkConfig {
                max_command_len: 4,
                ..LinkConfig::default()
            },
            ..AgentConfig::default()
        };
        let err = run(&config, &["unlock".to_string()]).await.unwrap_err();
        // The phone seals with the default limit; the bike's smaller one refuses the frame
        assert!(matches!(err, DemoError::Refused(_)));
    }

    #[test]
    fn test_ack_handler() {
        let reply = tokio_test::block_on(AckHandler.handle(b"horn"));
        assert_eq!(reply, Some(b"ok:horn".to_vec()));
    }
}
