//! Core types: key identifiers, records, payloads, and signatures.

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// Key identity
// ---------------------------------------------------------------------------

/// Unique key identifier: 16 random bytes, hex-encoded (32 chars).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a key is for. One record serves exactly one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Symmetric AEAD key.
    Encryption,
    /// Signing seed; the public half is cached on the record.
    Signing,
    /// Imported public verification key. Holds no secret.
    Verification,
    /// Key-exchange keypair (secret bundle plus cached public bundle).
    Keypair,
}

impl KeyKind {
    pub fn label(&self) -> &'static str {
        match self {
            KeyKind::Encryption => "encryption",
            KeyKind::Signing => "signing",
            KeyKind::Verification => "verification",
            KeyKind::Keypair => "keypair",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Secret key bytes. Zeroized on drop, redacted in debug output, and
/// hex-encoded when serialized (the store layer encrypts the whole
/// serialized set before it touches disk).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zeroize and drop the bytes, leaving an empty buffer behind.
    pub fn purge(&mut self) {
        self.0.zeroize();
        self.0 = Vec::new();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes redacted>)", self.0.len())
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(KeyMaterial)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Key record
// ---------------------------------------------------------------------------

/// One stored key with its full lifecycle state.
///
/// Expiry and purge are separate events: an expired record keeps its
/// material (old payloads stay decryptable) until the grace window also
/// passes and [`KeyRecord::purge`] zeroizes it. The purged record stays
/// behind as a tombstone so lookups can answer "purged" rather than
/// "never existed".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub kind: KeyKind,
    /// Suite identifier, e.g. `aes-256-gcm` or `ed25519ph`.
    pub algorithm: String,
    /// Secret bytes. For `Verification` records this holds the public
    /// key, which is all such a record has.
    pub key_material: KeyMaterial,
    /// Cached public half, hex-encoded (`Signing` and `Keypair` kinds).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub public_hex: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the material has been physically destroyed.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub purged_at: Option<DateTime<Utc>>,
    /// Quality score of the entropy pool that produced this key, in
    /// `0.0..=1.0`. Imported keys carry 0.0 (no pool provenance).
    pub entropy_quality: f64,
}

impl KeyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_purged(&self) -> bool {
        self.purged_at.is_some()
    }

    /// Usable for new encrypt/sign operations: not expired, not purged.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.is_purged()
    }

    /// Zeroize the material and mark the record as a tombstone.
    pub fn purge(&mut self, now: DateTime<Utc>) {
        self.key_material.purge();
        self.public_hex = None;
        self.purged_at = Some(now);
    }

    /// Public verification bytes, if this kind has any: the material
    /// itself for `Verification` records, the cached public half for
    /// `Signing` and `Keypair` records.
    pub fn verification_bytes(&self) -> Option<Vec<u8>> {
        match self.kind {
            KeyKind::Verification => Some(self.key_material.as_bytes().to_vec()),
            KeyKind::Signing | KeyKind::Keypair => {
                self.public_hex.as_deref().and_then(|h| hex::decode(h).ok())
            }
            KeyKind::Encryption => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Everything needed to decrypt later, except the key itself. Payloads
/// reference keys by id only; material never travels with ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub auth_tag: Vec<u8>,
    pub key_id: KeyId,
    /// AEAD suite identifier the payload was sealed under.
    pub algorithm: String,
    pub security_level: u8,
    /// Hex digest of the plaintext under the level's digest suite.
    pub data_integrity_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A detached signature with enough context to verify it later.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "hex_bytes")]
    pub signature_bytes: Vec<u8>,
    pub key_id: KeyId,
    /// Signature suite identifier.
    pub algorithm: String,
    pub security_level: u8,
    /// Hex digest of the signed data under the level's digest suite.
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Hex encoding for byte fields in JSON.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
