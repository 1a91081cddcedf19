//! Non-volatile storage backends for the trust store.
//!
//! The trust store persists three named blobs. A backend only moves opaque
//! bytes; structure checks happen in [`crate::store`].

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use zeroize::Zeroizing;

use bikelink_crypto::CryptoError;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Identity or server key has never been written.
    #[error("device is not provisioned")]
    NotProvisioned,

    #[error("device is already provisioned")]
    AlreadyProvisioned,

    #[error("{blob} blob is corrupt: {reason}")]
    Corrupt { blob: BlobKey, reason: String },

    #[error("pairing table is full")]
    TableFull,

    /// An all-zero phone identity marks a free slot and cannot be stored.
    #[error("pairing record has an all-zero phone identity")]
    ZeroIdentity,

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("key generation failed: {0}")]
    Crypto(CryptoError),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Names of the persisted blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKey {
    /// Own identity keypair, 64 bytes.
    Identity,
    /// Trusted server public key, 32 bytes.
    ServerKey,
    /// Count byte followed by the fixed-size pairing slots.
    Pairings,
}

impl BlobKey {
    pub const ALL: [BlobKey; 3] = [BlobKey::Identity, BlobKey::ServerKey, BlobKey::Pairings];

    pub fn name(self) -> &'static str {
        match self {
            BlobKey::Identity => "identity",
            BlobKey::ServerKey => "server_key",
            BlobKey::Pairings => "pairings",
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Blob storage. A successful `write` must be durable before it returns.
pub trait Storage: Send {
    fn read(&self, key: BlobKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;
    fn write(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StoreError>;
    fn erase(&mut self, key: BlobKey) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<BlobKey, Zeroizing<Vec<u8>>>,
    fail_writes: bool,
}

/// In-memory backend. Clones share the same blobs, so a test can keep a
/// handle to inspect or corrupt what the store persisted.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a flash error.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    /// Copy of a stored blob.
    pub fn raw(&self, key: BlobKey) -> Option<Vec<u8>> {
        let inner = self.inner.lock().ok()?;
        inner.blobs.get(&key).map(|b| b.to_vec())
    }

    /// Overwrite a blob directly, bypassing the failure switch.
    pub fn put_raw(&self, key: BlobKey, data: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.blobs.insert(key, Zeroizing::new(data.to_vec()));
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Io("memory storage lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: BlobKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        Ok(self.lock()?.blobs.get(&key).cloned())
    }

    fn write(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.fail_writes {
            return Err(StoreError::Io(format!("write of {} failed", key)));
        }
        inner.blobs.insert(key, Zeroizing::new(data.to_vec()));
        Ok(())
    }

    fn erase(&mut self, key: BlobKey) -> Result<(), StoreError> {
        self.lock()?.blobs.remove(&key);
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// One file per blob under a directory.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash leaves either the old or the new blob, never a mix.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: BlobKey) -> PathBuf {
        self.dir.join(format!("{}.bin", key.name()))
    }

    fn temp_path(&self, key: BlobKey) -> PathBuf {
        self.dir.join(format!(".{}.tmp", key.name()))
    }
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl Storage for FileStorage {
    fn read(&self, key: BlobKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(Some(Zeroizing::new(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StoreError> {
        let temp = self.temp_path(key);
        let mut file = open_private(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, self.path(key))?;
        // Persist the rename itself.
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn erase(&mut self, key: BlobKey) -> Result<(), StoreError> {
        let path = self.path(key);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len() as usize,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // Overwrite before unlinking so key bytes do not linger in the file.
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.write_all(&vec![0u8; len])?;
        file.sync_all()?;
        drop(file);
        fs::remove_file(&path)?;
        Ok(())
    }
}
