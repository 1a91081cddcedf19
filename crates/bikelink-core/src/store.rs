//! Key & trust store: own identity, trusted server key and the pairing table.
//!
//! Mutations are persisted before the in-memory table changes, so a failed
//! write never leaves the bike believing in a pairing that storage lost.
//!
//! Pairing table layout: `count(1) ‖ capacity × record(144)`, with each record
//! `phone_identity_pk ‖ bike_pairing_secret ‖ bike_pairing_pk ‖
//! phone_pairing_pk ‖ start(8, LE) ‖ end(8, LE)`. A free slot is all zeroes.

use bytes::{Buf, BufMut};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use bikelink_crypto::utils::{constant_time_compare_array, is_all_zero};
use bikelink_crypto::{KeyPair, KEYPAIR_LEN};

use crate::config::LinkConfig;
use crate::storage::{BlobKey, StoreError, Storage};
use crate::types::key_prefix;
use crate::wire::{Validity, PUBLIC_KEY_LEN};

pub const PAIRING_RECORD_LEN: usize = 4 * PUBLIC_KEY_LEN + 16;
pub const SERVER_KEY_LEN: usize = PUBLIC_KEY_LEN;

/// Byte length of a persisted table with `capacity` slots.
pub fn pairing_table_len(capacity: usize) -> usize {
    1 + capacity * PAIRING_RECORD_LEN
}

// ============================================================================
// Data Models
// ============================================================================

/// One paired phone.
#[derive(Clone, Debug)]
pub struct PairingRecord {
    /// Identifies the slot; never all-zero for an occupied slot.
    pub phone_identity_pk: [u8; PUBLIC_KEY_LEN],
    /// Per-relationship key, rotated on every re-pair.
    pub bike_pairing: KeyPair,
    pub phone_pairing_pk: [u8; PUBLIC_KEY_LEN],
    pub validity: Validity,
}

impl PairingRecord {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let keypair = self.bike_pairing.to_bytes();
        out.put_slice(&self.phone_identity_pk);
        out.put_slice(&keypair[..]);
        out.put_slice(&self.phone_pairing_pk);
        out.put_u64_le(self.validity.start);
        out.put_u64_le(self.validity.end);
    }

    /// `Ok(None)` for a free slot. A zero identity with anything else set
    /// is corrupt.
    fn decode(mut bytes: &[u8]) -> Result<Option<Self>, String> {
        let mut phone_identity_pk = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_to_slice(&mut phone_identity_pk);
        if is_all_zero(&phone_identity_pk) {
            if !is_all_zero(bytes) {
                return Err("free slot holds key material".to_string());
            }
            return Ok(None);
        }

        let mut keypair = Zeroizing::new([0u8; KEYPAIR_LEN]);
        bytes.copy_to_slice(&mut keypair[..]);
        let bike_pairing = KeyPair::from_bytes(&keypair)
            .map_err(|_| "pairing public key does not match its secret".to_string())?;

        let mut phone_pairing_pk = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_to_slice(&mut phone_pairing_pk);
        let validity = Validity {
            start: bytes.get_u64_le(),
            end: bytes.get_u64_le(),
        };

        Ok(Some(Self {
            phone_identity_pk,
            bike_pairing,
            phone_pairing_pk,
            validity,
        }))
    }
}

fn encode_table(slots: &[Option<PairingRecord>]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(pairing_table_len(slots.len())));
    out.put_u8(slots.iter().filter(|s| s.is_some()).count() as u8);
    for slot in slots {
        match slot {
            Some(record) => record.encode_into(&mut out),
            None => out.put_bytes(0, PAIRING_RECORD_LEN),
        }
    }
    out
}

fn decode_table(bytes: &[u8], capacity: usize) -> Result<Vec<Option<PairingRecord>>, String> {
    let expected = pairing_table_len(capacity);
    if bytes.len() != expected {
        return Err(format!("expected {} bytes, got {}", expected, bytes.len()));
    }

    let mut slots = Vec::with_capacity(capacity);
    for chunk in bytes[1..].chunks_exact(PAIRING_RECORD_LEN) {
        let record = PairingRecord::decode(chunk)?;
        if let Some(record) = &record {
            let duplicate = slots.iter().flatten().any(|other: &PairingRecord| {
                constant_time_compare_array(&other.phone_identity_pk, &record.phone_identity_pk)
            });
            if duplicate {
                return Err("phone identity occupies two slots".to_string());
            }
        }
        slots.push(record);
    }

    let occupied = slots.iter().filter(|s| s.is_some()).count();
    if occupied != bytes[0] as usize {
        return Err(format!(
            "count byte says {} records, found {}",
            bytes[0], occupied
        ));
    }
    Ok(slots)
}

fn read_exact_blob<const N: usize>(
    storage: &dyn Storage,
    key: BlobKey,
) -> Result<Zeroizing<[u8; N]>, StoreError> {
    let blob = storage.read(key)?.ok_or(StoreError::NotProvisioned)?;
    if blob.len() != N {
        return Err(StoreError::Corrupt {
            blob: key,
            reason: format!("expected {} bytes, got {}", N, blob.len()),
        });
    }
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&blob);
    Ok(out)
}

/// Erase identity, server key and pairing table.
pub fn factory_reset(storage: &mut dyn Storage) -> Result<(), StoreError> {
    for key in BlobKey::ALL {
        storage.erase(key)?;
    }
    warn!("factory reset: identity, server key and pairings erased");
    Ok(())
}

// ============================================================================
// Trust store
// ============================================================================

pub struct TrustStore {
    storage: Box<dyn Storage>,
    identity: KeyPair,
    server_public_key: [u8; SERVER_KEY_LEN],
    slots: Vec<Option<PairingRecord>>,
}

impl TrustStore {
    /// Factory provisioning: create a fresh identity, store the server key
    /// and an empty pairing table.
    ///
    /// Refuses to overwrite an existing identity.
    pub fn provision(
        storage: impl Storage + 'static,
        server_public_key: [u8; SERVER_KEY_LEN],
        config: &LinkConfig,
    ) -> Result<Self, StoreError> {
        let mut storage: Box<dyn Storage> = Box::new(storage);
        if storage.read(BlobKey::Identity)?.is_some() {
            return Err(StoreError::AlreadyProvisioned);
        }
        if is_all_zero(&server_public_key) {
            return Err(StoreError::Corrupt {
                blob: BlobKey::ServerKey,
                reason: "server key is all zero".to_string(),
            });
        }

        let identity = KeyPair::generate().map_err(StoreError::Crypto)?;
        let slots = vec![None; config.max_paired_phones];

        storage.write(BlobKey::ServerKey, &server_public_key)?;
        storage.write(BlobKey::Pairings, &encode_table(&slots))?;
        // Identity last: its presence marks a completed provisioning.
        storage.write(BlobKey::Identity, &identity.to_bytes()[..])?;

        info!(
            identity = %key_prefix(identity.public()),
            server = %key_prefix(&server_public_key),
            "device provisioned"
        );

        Ok(Self {
            storage,
            identity,
            server_public_key,
            slots,
        })
    }

    /// Load persisted state.
    ///
    /// A missing or malformed identity or server key fails closed. A
    /// malformed pairing table is reset to empty and persisted.
    pub fn load(storage: impl Storage + 'static, config: &LinkConfig) -> Result<Self, StoreError> {
        let mut storage: Box<dyn Storage> = Box::new(storage);

        let identity_bytes = read_exact_blob::<KEYPAIR_LEN>(&*storage, BlobKey::Identity)?;
        let identity = KeyPair::from_bytes(&identity_bytes).map_err(|_| StoreError::Corrupt {
            blob: BlobKey::Identity,
            reason: "public key does not match secret".to_string(),
        })?;

        let server_public_key =
            *read_exact_blob::<SERVER_KEY_LEN>(&*storage, BlobKey::ServerKey)?;
        if is_all_zero(&server_public_key) {
            return Err(StoreError::Corrupt {
                blob: BlobKey::ServerKey,
                reason: "server key is all zero".to_string(),
            });
        }

        let capacity = config.max_paired_phones;
        let decoded = match storage.read(BlobKey::Pairings)? {
            Some(bytes) => decode_table(&bytes, capacity),
            None => Err("pairing table missing".to_string()),
        };
        let slots = match decoded {
            Ok(slots) => slots,
            Err(reason) => {
                warn!(%reason, "pairing table unusable, resetting to empty");
                let empty = vec![None; capacity];
                storage.write(BlobKey::Pairings, &encode_table(&empty))?;
                empty
            }
        };

        let store = Self {
            storage,
            identity,
            server_public_key,
            slots,
        };
        info!(
            identity = %key_prefix(store.identity.public()),
            pairings = store.pairing_count(),
            capacity,
            "trust store loaded"
        );
        Ok(store)
    }

    pub fn identity(&self) -> &KeyPair {
        &self.identity
    }

    pub fn server_public_key(&self) -> &[u8; SERVER_KEY_LEN] {
        &self.server_public_key
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn pairing_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn pairing(&self, slot: usize) -> Option<&PairingRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their indices.
    pub fn pairings(&self) -> impl Iterator<Item = (usize, &PairingRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|r| (i, r)))
    }

    pub fn find_pairing_by_phone_identity(
        &self,
        phone_identity_pk: &[u8; PUBLIC_KEY_LEN],
    ) -> Option<usize> {
        self.find_slot(|record| &record.phone_identity_pk, phone_identity_pk)
    }

    pub fn find_pairing_by_bike_pairing_pk(
        &self,
        bike_pairing_pk: &[u8; PUBLIC_KEY_LEN],
    ) -> Option<usize> {
        self.find_slot(|record| record.bike_pairing.public(), bike_pairing_pk)
    }

    /// Scans every slot regardless of where the match is.
    fn find_slot<F>(&self, field: F, wanted: &[u8; PUBLIC_KEY_LEN]) -> Option<usize>
    where
        F: Fn(&PairingRecord) -> &[u8; PUBLIC_KEY_LEN],
    {
        let mut found = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(record) = slot {
                if constant_time_compare_array(field(record), wanted) && found.is_none() {
                    found = Some(i);
                }
            }
        }
        found
    }

    /// Store `record` in the slot of its phone identity, or the first free
    /// slot. Returns the slot index.
    pub fn upsert_pairing(&mut self, record: PairingRecord) -> Result<usize, StoreError> {
        if is_all_zero(&record.phone_identity_pk) {
            return Err(StoreError::ZeroIdentity);
        }
        let slot = match self.find_pairing_by_phone_identity(&record.phone_identity_pk) {
            Some(existing) => existing,
            None => self
                .slots
                .iter()
                .position(Option::is_none)
                .ok_or(StoreError::TableFull)?,
        };

        let phone = key_prefix(&record.phone_identity_pk);
        let bike_pairing = key_prefix(record.bike_pairing.public());

        let mut updated = self.slots.clone();
        updated[slot] = Some(record);
        self.storage.write(BlobKey::Pairings, &encode_table(&updated))?;
        self.slots = updated;

        debug!(slot, %phone, %bike_pairing, "pairing record stored");
        Ok(slot)
    }

    pub fn clear_all_pairings(&mut self) -> Result<(), StoreError> {
        let empty = vec![None; self.slots.len()];
        self.storage.write(BlobKey::Pairings, &encode_table(&empty))?;
        self.slots = empty;
        info!("all pairings cleared");
        Ok(())
    }

    /// Erase everything this store persisted, consuming it.
    pub fn factory_reset(mut self) -> Result<(), StoreError> {
        factory_reset(&mut *self.storage)
    }
}
