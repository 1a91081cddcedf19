//! Device identity and trust store maintenance for the agent.
//!
//! Everything here operates on the file-backed store under
//! `AgentConfig::storage_dir`.

use std::fmt;

use bikelink_core::store;
use bikelink_core::types::key_prefix;
use bikelink_core::wire::{Validity, PUBLIC_KEY_LEN};
use bikelink_core::{FileStorage, StoreError, TrustStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid server key: {0}")]
    InvalidServerKey(String),
    #[error("trust store error: {0}")]
    Store(#[from] StoreError),
}

/// Parse a hex-encoded 32-byte server public key.
pub fn parse_server_key(input: &str) -> Result<[u8; PUBLIC_KEY_LEN], IdentityError> {
    let bytes = hex::decode(input.trim())
        .map_err(|e| IdentityError::InvalidServerKey(e.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        IdentityError::InvalidServerKey(format!(
            "expected {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

fn storage(config: &AgentConfig) -> Result<FileStorage, IdentityError> {
    Ok(FileStorage::new(&config.storage_dir)?)
}

/// Create the device identity and store the server key.
///
/// With `force`, any existing state is erased first; otherwise an existing
/// identity is an error.
pub fn provision(
    config: &AgentConfig,
    server_public_key: [u8; PUBLIC_KEY_LEN],
    force: bool,
) -> Result<TrustStore, IdentityError> {
    let mut storage = storage(config)?;
    if force {
        warn!(dir = %config.storage_dir.display(), "erasing existing state before provisioning");
        store::factory_reset(&mut storage)?;
    }
    let store = TrustStore::provision(storage, server_public_key, &config.link)?;
    info!(dir = %config.storage_dir.display(), "provisioning complete");
    Ok(store)
}

/// Load the persisted store. Fails closed on a corrupt identity.
pub fn open_store(config: &AgentConfig) -> Result<TrustStore, IdentityError> {
    Ok(TrustStore::load(storage(config)?, &config.link)?)
}

/// Remove every pairing, keeping the identity. Returns how many were removed.
pub fn reset_pairings(config: &AgentConfig) -> Result<usize, IdentityError> {
    let mut store = open_store(config)?;
    let removed = store.pairing_count();
    store.clear_all_pairings()?;
    Ok(removed)
}

/// Erase identity, server key and pairings without loading them first, so
/// a corrupt store can still be wiped.
pub fn factory_reset(config: &AgentConfig) -> Result<(), IdentityError> {
    let mut storage = storage(config)?;
    store::factory_reset(&mut storage)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSummary {
    pub slot: usize,
    pub phone_identity_pk: [u8; PUBLIC_KEY_LEN],
    pub bike_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub phone_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub validity: Validity,
}

/// Public view of the trust store, safe to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub identity_pk: [u8; PUBLIC_KEY_LEN],
    pub server_pk: [u8; PUBLIC_KEY_LEN],
    pub capacity: usize,
    pub pairings: Vec<PairingSummary>,
}

impl StoreSummary {
    pub fn of(store: &TrustStore) -> Self {
        Self {
            identity_pk: *store.identity().public(),
            server_pk: *store.server_public_key(),
            capacity: store.capacity(),
            pairings: store
                .pairings()
                .map(|(slot, record)| PairingSummary {
                    slot,
                    phone_identity_pk: record.phone_identity_pk,
                    bike_pairing_pk: *record.bike_pairing.public(),
                    phone_pairing_pk: record.phone_pairing_pk,
                    validity: record.validity,
                })
                .collect(),
        }
    }
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "identity:   {}", hex::encode(self.identity_pk))?;
        writeln!(f, "server key: {}", hex::encode(self.server_pk))?;
        writeln!(f, "pairings:   {}/{}", self.pairings.len(), self.capacity)?;
        for p in &self.pairings {
            writeln!(
                f,
                "  [{}] phone {} bike-pairing {} phone-pairing {} valid {}..={}",
                p.slot,
                key_prefix(&p.phone_identity_pk),
                hex::encode(p.bike_pairing_pk),
                key_prefix(&p.phone_pairing_pk),
                p.validity.start,
                p.validity.end,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikelink_core::harness::{TestPhone, TestServer};
    use bikelink_core::pairing::handle_pair_request;

    const NOW: u64 = 1_700_000_000;

    fn config(dir: &tempfile::TempDir) -> AgentConfig {
        AgentConfig {
            storage_dir: dir.path().to_path_buf(),
            ..AgentConfig::default()
        }
    }

    fn pair_one(store: &mut TrustStore, server: &TestServer, cfg: &AgentConfig) {
        let phone = TestPhone::new().unwrap();
        let window = Validity {
            start: NOW,
            end: NOW + 60,
        };
        let request = server
            .authorise(&phone, store.identity().public(), window)
            .unwrap();
        handle_pair_request(store, &cfg.link, NOW, &request).unwrap();
    }

    #[test]
    fn test_parse_server_key() {
        let key = parse_server_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key, [0xAB; 32]);
        assert!(parse_server_key("abcd").is_err());
        assert!(parse_server_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_provision_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let server = TestServer::new().unwrap();

        let identity = *provision(&cfg, *server.public_key(), false)
            .unwrap()
            .identity()
            .public();
        let store = open_store(&cfg).unwrap();
        assert_eq!(*store.identity().public(), identity);
        assert_eq!(store.server_public_key(), server.public_key());
    }

    #[test]
    fn test_provision_requires_force_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let server = TestServer::new().unwrap();

        let first = *provision(&cfg, *server.public_key(), false)
            .unwrap()
            .identity()
            .public();
        let err = provision(&cfg, *server.public_key(), false).err().unwrap();
        assert!(matches!(err, IdentityError::Store(StoreError::AlreadyProvisioned)));

        let second = *provision(&cfg, *server.public_key(), true)
            .unwrap()
            .identity()
            .public();
        assert_ne!(first, second);
    }

    #[test]
    fn test_reset_pairings_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let server = TestServer::new().unwrap();
        let mut store = provision(&cfg, *server.public_key(), false).unwrap();
        let identity = *store.identity().public();
        pair_one(&mut store, &server, &cfg);
        pair_one(&mut store, &server, &cfg);
        drop(store);

        assert_eq!(reset_pairings(&cfg).unwrap(), 2);
        let store = open_store(&cfg).unwrap();
        assert_eq!(store.pairing_count(), 0);
        assert_eq!(*store.identity().public(), identity);
    }

    #[test]
    fn test_factory_reset_unprovisions() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let server = TestServer::new().unwrap();
        provision(&cfg, *server.public_key(), false).unwrap();

        factory_reset(&cfg).unwrap();
        let err = open_store(&cfg).err().unwrap();
        assert!(matches!(err, IdentityError::Store(StoreError::NotProvisioned)));
    }

    #[test]
    fn test_summary_lists_pairings() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let server = TestServer::new().unwrap();
        let mut store = provision(&cfg, *server.public_key(), false).unwrap();
        pair_one(&mut store, &server, &cfg);

        let summary = StoreSummary::of(&store);
        assert_eq!(summary.capacity, cfg.link.max_paired_phones);
        assert_eq!(summary.pairings.len(), 1);
        assert_eq!(summary.pairings[0].validity.end, NOW + 60);

        let text = summary.to_string();
        assert!(text.contains(&hex::encode(summary.identity_pk)));
        assert!(text.contains(&hex::encode(summary.pairings[0].bike_pairing_pk)));
    }
}
