use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Number of public-key bytes shown in logs.
const KEY_PREFIX_LEN: usize = 4;

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Unpaired,
    Paired,
    SessionCreated,
}

/// Request types the transport delivers to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Pair,
    Session,
    Command,
}

/// Source of the current Unix time in seconds.
///
/// Treated as low-resolution, untrusted input: it only gates validity
/// windows and never feeds key material.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        // Clocks before 1970 are treated as the epoch.
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Short hex prefix of a public key for log fields.
pub fn key_prefix(public_key: &[u8]) -> String {
    let end = public_key.len().min(KEY_PREFIX_LEN);
    hex::encode(&public_key[..end])
}
