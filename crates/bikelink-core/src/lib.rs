//! Bikelink Core - trust establishment and secure channel for the bike side
//! of the phone link.
//!
//! This crate implements:
//! - Length-checked codecs for every message on the link
//! - The key & trust store over a pluggable storage backend
//! - Server-authorised pairing and four-way DH session establishment
//! - The XChaCha20-Poly1305 command channel
//! - The per-link connection state machine
//!
//! Transport, scheduling and persistence media are supplied by the caller.

#![forbid(unsafe_code)]

// Protocol steps
pub mod pairing;
pub mod session;
pub mod channel;
pub mod connection;

// Infrastructure
pub mod wire;
pub mod storage;
pub mod store;

// Supporting modules
pub mod config;
pub mod errors;
pub mod types;
pub mod harness;

#[cfg(test)]
mod proptests;

pub use config::LinkConfig;
pub use connection::{Connection, Inbound, SharedStore};
pub use errors::{Disposition, ErrorCode, LinkError};
pub use session::SessionContext;
pub use storage::{BlobKey, FileStorage, MemoryStorage, Storage, StoreError};
pub use store::{PairingRecord, TrustStore};
pub use types::{Clock, ConnectionState, RequestKind, SystemClock};
