//! Persistence: key and history stores, encrypted at rest.
//!
//! The file-backed key store serializes the full record set to JSON and
//! seals it AES-256-GCM under a master key before anything touches disk.
//! Writes go to a temp file first and are renamed into place, so a crash
//! mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use palisade_cipher::aead;
use palisade_cipher::tier::AeadSuite;
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::PersistenceError;
use crate::types::KeyRecord;

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Durable home for key records. `persist` replaces the full set
/// atomically; there is no partial-update path.
pub trait KeyStore: Send + Sync {
    /// Load every stored record. An empty store returns an empty vec.
    fn load(&self) -> Result<Vec<KeyRecord>, PersistenceError>;

    /// Replace the stored set with `records`.
    fn persist(&self, records: &[KeyRecord]) -> Result<(), PersistenceError>;
}

/// Single-blob store for the serialized detection history. The blob
/// arrives already encrypted; this layer only moves bytes.
pub trait HistoryStore: Send + Sync {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn persist_blob(&self, blob: &[u8]) -> Result<(), PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory backends
// ---------------------------------------------------------------------------

/// Volatile key store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryKeyStore {
    records: RwLock<Vec<KeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Vec<KeyRecord>, PersistenceError> {
        Ok(self.records.read().unwrap().clone())
    }

    fn persist(&self, records: &[KeyRecord]) -> Result<(), PersistenceError> {
        *self.records.write().unwrap() = records.to_vec();
        Ok(())
    }
}

/// Volatile history store.
#[derive(Default)]
pub struct MemoryHistoryStore {
    blob: RwLock<Option<Vec<u8>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blob.read().unwrap().clone())
    }

    fn persist_blob(&self, blob: &[u8]) -> Result<(), PersistenceError> {
        *self.blob.write().unwrap() = Some(blob.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The out-of-band secret protecting file-backed stores. Losing it makes
/// the store unrecoverable; there is no fallback decryption path.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Fresh random master key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Read the key from `path`, or generate one and write it there with
    /// owner-only permissions.
    pub fn load_or_generate(path: &Path) -> Result<Self, PersistenceError> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)
                .map_err(|e| PersistenceError(format!("read master key: {}", e)))?;
            let bytes = hex::decode(encoded.trim())
                .map_err(|e| PersistenceError(format!("master key malformed: {}", e)))?;
            let key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| PersistenceError("master key malformed: wrong length".into()))?;
            return Ok(Self(key));
        }

        let key = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError(format!("create dir: {}", e)))?;
        }
        std::fs::write(path, hex::encode(key.0))
            .map_err(|e| PersistenceError(format!("write master key: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| PersistenceError(format!("chmod master key: {}", e)))?;
        }
        Ok(key)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Encrypted file store
// ---------------------------------------------------------------------------

/// Production key store: one file holding the sealed record set.
///
/// File layout: `nonce[12] || ciphertext || tag[16]`. The store path is
/// bound into the AAD, so a blob copied to a different location will not
/// open.
pub struct EncryptedFileStore {
    path: PathBuf,
    master: MasterKey,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, master: MasterKey) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError(format!("create dir: {}", e)))?;
        }
        Ok(Self { path, master })
    }

    fn aad(&self) -> Vec<u8> {
        format!("store|{}|v1", self.path.display()).into_bytes()
    }
}

impl KeyStore for EncryptedFileStore {
    fn load(&self) -> Result<Vec<KeyRecord>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read(&self.path)
            .map_err(|e| PersistenceError(format!("read: {}", e)))?;
        if raw.len() < aead::NONCE_BYTES + aead::TAG_BYTES {
            return Err(PersistenceError("store file truncated".into()));
        }
        let nonce: [u8; aead::NONCE_BYTES] = raw[..aead::NONCE_BYTES]
            .try_into()
            .map_err(|_| PersistenceError("store file truncated".into()))?;
        let json = aead::open(
            AeadSuite::Aes256Gcm,
            self.master.as_bytes(),
            &nonce,
            &raw[aead::NONCE_BYTES..],
            &self.aad(),
        )
        .map_err(|_| {
            PersistenceError("store unsealing failed: wrong master key or corrupt file".into())
        })?;
        serde_json::from_slice(&json).map_err(|e| PersistenceError(format!("parse: {}", e)))
    }

    fn persist(&self, records: &[KeyRecord]) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec(records)
            .map_err(|e| PersistenceError(format!("serialize: {}", e)))?;
        let nonce =
            aead::nonce().map_err(|_| PersistenceError("nonce generation failed".into()))?;
        let sealed = aead::seal(
            AeadSuite::Aes256Gcm,
            self.master.as_bytes(),
            &nonce,
            &json,
            &self.aad(),
        )
        .map_err(|_| PersistenceError("store sealing failed".into()))?;

        let mut out = Vec::with_capacity(aead::NONCE_BYTES + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);

        // Write to a temp file, then rename for atomic replacement
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &out).map_err(|e| PersistenceError(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| PersistenceError(format!("rename: {}", e)))?;
        Ok(())
    }
}

/// File-backed history store. The blob it receives is an already
/// encrypted payload, so the file itself needs no second sealing; writes
/// still go through the temp-and-rename path.
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError(format!("create dir: {}", e)))?;
        }
        Ok(Self { path })
    }
}

impl HistoryStore for FileHistoryStore {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read(&self.path)
            .map(Some)
            .map_err(|e| PersistenceError(format!("read: {}", e)))
    }

    fn persist_blob(&self, blob: &[u8]) -> Result<(), PersistenceError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob).map_err(|e| PersistenceError(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| PersistenceError(format!("rename: {}", e)))?;
        Ok(())
    }
}
