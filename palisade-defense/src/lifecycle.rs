//! Key lifecycle: creation, retrieval, rotation, expiry, and purge.
//!
//! All mutation goes through one internal mutex, so concurrent callers
//! see a serialized sequence of read-modify-write-persist steps and the
//! store never observes a torn update.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use palisade_cipher::entropy::EntropyPool;
use palisade_cipher::tier::{AeadSuite, ExchangeSuite, SecurityLevel, SignatureSuite};
use palisade_cipher::{exchange, sign};
use zeroize::Zeroize;

use crate::error::{ConfigError, CryptoError};
use crate::store::KeyStore;
use crate::types::{KeyId, KeyKind, KeyMaterial, KeyRecord};

/// Key lifetime floor: one hour.
pub const MIN_KEY_LIFETIME_SECS: u64 = 3600;
/// Default key lifetime: 30 days.
pub const DEFAULT_KEY_LIFETIME_SECS: u64 = 30 * 86400;
/// Default grace window applied to superseded keys: 7 days.
pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 7 * 86400;
/// Entropy quality below this logs a warning on every key creation.
pub const ENTROPY_WARN_THRESHOLD: f64 = 0.5;

/// Lifecycle tunables. Validated once at manager construction.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Lifetime applied to newly created keys.
    pub default_lifetime: StdDuration,
    /// How long expired keys keep their material before purge, and the
    /// horizon superseded keys are shortened to at rotation.
    pub grace_window: StdDuration,
    /// Security level used where an operation does not name one
    /// (keypair generation).
    pub default_level: u8,
    /// Optional hard floor on entropy quality. `None` keeps the score
    /// purely informational.
    pub require_entropy_quality: Option<f64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_lifetime: StdDuration::from_secs(DEFAULT_KEY_LIFETIME_SECS),
            grace_window: StdDuration::from_secs(DEFAULT_GRACE_WINDOW_SECS),
            default_level: 3,
            require_entropy_quality: None,
        }
    }
}

/// Owner of every key record. Other components hold an `Arc` to this and
/// reference keys by id; material never crosses a payload boundary.
pub struct KeyLifecycleManager {
    store: Arc<dyn KeyStore>,
    records: Mutex<Vec<KeyRecord>>,
    lifetime: Mutex<StdDuration>,
    grace: Duration,
    default_level: SecurityLevel,
    require_entropy_quality: Option<f64>,
}

impl KeyLifecycleManager {
    /// Manager with default configuration over `store`.
    pub fn new(store: Arc<dyn KeyStore>) -> Result<Self, CryptoError> {
        Self::with_config(store, LifecycleConfig::default())
    }

    /// Manager with explicit configuration. Loads the stored record set
    /// and runs one expiry sweep before returning.
    pub fn with_config(
        store: Arc<dyn KeyStore>,
        config: LifecycleConfig,
    ) -> Result<Self, CryptoError> {
        let default_level = SecurityLevel::new(config.default_level)
            .map_err(|_| ConfigError::InvalidLevel(config.default_level))?;
        if config.default_lifetime.as_secs() < MIN_KEY_LIFETIME_SECS {
            return Err(ConfigError::LifetimeTooShort {
                requested_secs: config.default_lifetime.as_secs(),
                floor_secs: MIN_KEY_LIFETIME_SECS,
            }
            .into());
        }

        let records = store.load()?;
        let manager = Self {
            store,
            records: Mutex::new(records),
            lifetime: Mutex::new(config.default_lifetime),
            grace: Duration::from_std(config.grace_window).unwrap_or(Duration::MAX),
            default_level,
            require_entropy_quality: config.require_entropy_quality,
        };
        manager.clean_expired_keys()?;
        Ok(manager)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Generate a key-exchange keypair at the configured default level.
    pub fn generate_key_pair(&self) -> Result<KeyRecord, CryptoError> {
        let suite = self.default_level.exchange();
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let record = self.create_record(KeyKind::Keypair, suite.id(), now)?;
        records.push(record.clone());
        self.persist_locked(&records)?;
        Ok(record)
    }

    /// Return the newest live encryption key for `algorithm`, creating
    /// one if none exists.
    pub fn get_or_create_encryption_key(&self, algorithm: &str) -> Result<KeyRecord, CryptoError> {
        self.get_or_create(KeyKind::Encryption, algorithm)
    }

    /// Return the newest live signing key for `algorithm`, creating one
    /// if none exists.
    pub fn get_or_create_signing_key(&self, algorithm: &str) -> Result<KeyRecord, CryptoError> {
        self.get_or_create(KeyKind::Signing, algorithm)
    }

    fn get_or_create(&self, kind: KeyKind, algorithm: &str) -> Result<KeyRecord, CryptoError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        // Newest first, so a freshly minted rotation key wins over its
        // superseded predecessor still inside the grace window.
        if let Some(existing) = records
            .iter()
            .rev()
            .find(|r| r.kind == kind && r.algorithm == algorithm && r.is_live_at(now))
        {
            return Ok(existing.clone());
        }
        let record = self.create_record(kind, algorithm, now)?;
        records.push(record.clone());
        self.persist_locked(&records)?;
        Ok(record)
    }

    /// Register an externally produced public verification key.
    pub fn import_verification_key(
        &self,
        algorithm: &str,
        public: &[u8],
    ) -> Result<KeyRecord, CryptoError> {
        SignatureSuite::from_id(algorithm)
            .ok_or_else(|| ConfigError::UnknownAlgorithm(algorithm.to_string()))?;
        if public.len() != sign::PUBLIC_KEY_BYTES {
            return Err(ConfigError::MalformedKey {
                expected: sign::PUBLIC_KEY_BYTES,
                got: public.len(),
            }
            .into());
        }

        let now = Utc::now();
        let record = KeyRecord {
            id: KeyId::generate(),
            kind: KeyKind::Verification,
            algorithm: algorithm.to_string(),
            key_material: KeyMaterial::new(public.to_vec()),
            public_hex: None,
            created_at: now,
            expires_at: expiry(now, self.current_lifetime()),
            purged_at: None,
            entropy_quality: 0.0,
        };

        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        self.persist_locked(&records)?;
        tracing::info!(key_id = %record.id, algorithm = %record.algorithm, "verification key imported");
        Ok(record)
    }

    /// Build a new record of `kind`. Material is drawn from a fresh
    /// entropy pool through domain-separated derivation.
    fn create_record(
        &self,
        kind: KeyKind,
        algorithm: &str,
        now: DateTime<Utc>,
    ) -> Result<KeyRecord, CryptoError> {
        let pool = self.gather_pool()?;
        let id = KeyId::generate();
        let info = format!("{}|{}", kind.label(), id);

        let (key_material, public_hex) = match kind {
            KeyKind::Encryption => {
                let suite = AeadSuite::from_id(algorithm)
                    .ok_or_else(|| ConfigError::UnknownAlgorithm(algorithm.to_string()))?;
                let material = pool
                    .derive(info.as_bytes(), suite.key_bytes())
                    .map_err(|_| CryptoError::Entropy)?;
                (KeyMaterial::new(material), None)
            }
            KeyKind::Signing => {
                SignatureSuite::from_id(algorithm)
                    .ok_or_else(|| ConfigError::UnknownAlgorithm(algorithm.to_string()))?;
                let mut seed = pool
                    .derive_seed(info.as_bytes())
                    .map_err(|_| CryptoError::Entropy)?;
                let public = sign::public_key(&seed);
                let material = KeyMaterial::new(seed.to_vec());
                seed.zeroize();
                (material, Some(hex::encode(public)))
            }
            KeyKind::Keypair => {
                let suite = ExchangeSuite::from_id(algorithm)
                    .ok_or_else(|| ConfigError::UnknownAlgorithm(algorithm.to_string()))?;
                let mut seed = pool
                    .derive_seed(info.as_bytes())
                    .map_err(|_| CryptoError::Entropy)?;
                let keypair = exchange::generate(suite, &seed);
                seed.zeroize();
                (
                    KeyMaterial::new(keypair.secret().to_vec()),
                    Some(hex::encode(keypair.public())),
                )
            }
            KeyKind::Verification => {
                // Imported, never derived.
                return Err(ConfigError::UnknownAlgorithm(algorithm.to_string()).into());
            }
        };

        let record = KeyRecord {
            id,
            kind,
            algorithm: algorithm.to_string(),
            key_material,
            public_hex,
            created_at: now,
            expires_at: expiry(now, self.current_lifetime()),
            purged_at: None,
            entropy_quality: pool.quality(),
        };
        tracing::info!(
            key_id = %record.id,
            kind = %record.kind,
            algorithm = %record.algorithm,
            entropy_quality = record.entropy_quality,
            "key created"
        );
        Ok(record)
    }

    fn gather_pool(&self) -> Result<EntropyPool, CryptoError> {
        let mut pool = EntropyPool::gather().map_err(|_| CryptoError::Entropy)?;
        if pool.quality() < ENTROPY_WARN_THRESHOLD {
            tracing::warn!(quality = pool.quality(), "entropy pool quality below warning threshold");
        }
        if let Some(floor) = self.require_entropy_quality {
            if pool.quality() < floor {
                // One regather before giving up.
                pool = EntropyPool::gather().map_err(|_| CryptoError::Entropy)?;
                if pool.quality() < floor {
                    return Err(ConfigError::EntropyBelowFloor {
                        score: pool.quality(),
                        floor,
                    }
                    .into());
                }
            }
        }
        Ok(pool)
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Fetch a key for decryption. Expired keys still resolve; purged
    /// ones fail with a categorical error.
    pub fn get_decryption_key(&self, id: &KeyId) -> Result<KeyRecord, CryptoError> {
        self.get_resolvable(id)
    }

    /// Fetch a key for signature verification. Same rules as
    /// [`get_decryption_key`](Self::get_decryption_key).
    pub fn get_verification_key(&self, id: &KeyId) -> Result<KeyRecord, CryptoError> {
        self.get_resolvable(id)
    }

    fn get_resolvable(&self, id: &KeyId) -> Result<KeyRecord, CryptoError> {
        let records = self.records.lock().unwrap();
        let record = records
            .iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| CryptoError::KeyNotFound(id.clone()))?;
        if record.is_purged() {
            return Err(CryptoError::KeyExpiredPurged(id.clone()));
        }
        Ok(record.clone())
    }

    /// Snapshot of every record, tombstones included.
    pub fn list_keys(&self) -> Vec<KeyRecord> {
        self.records.lock().unwrap().clone()
    }

    // -----------------------------------------------------------------------
    // Rotation and expiry
    // -----------------------------------------------------------------------

    /// Rotate every live (kind, algorithm) pair: mint a replacement key
    /// for each and shorten the old keys' expiry to the grace horizon.
    /// Expiries are only ever shortened, never extended. Returns the
    /// number of new keys created.
    pub fn rotate_all_keys(&self) -> Result<u32, CryptoError> {
        let now = Utc::now();
        let horizon = expiry_after(now, self.grace);
        let mut records = self.records.lock().unwrap();

        // Verification keys are imported, not ours to rotate.
        let mut pairs: Vec<(KeyKind, String)> = Vec::new();
        for r in records.iter() {
            if r.kind == KeyKind::Verification || !r.is_live_at(now) {
                continue;
            }
            if !pairs.iter().any(|(k, a)| *k == r.kind && a == &r.algorithm) {
                pairs.push((r.kind, r.algorithm.clone()));
            }
        }

        for r in records.iter_mut() {
            if r.is_purged() {
                continue;
            }
            let rotated = pairs.iter().any(|(k, a)| *k == r.kind && a == &r.algorithm);
            if rotated && r.expires_at > horizon {
                r.expires_at = horizon;
            }
        }

        let mut created = 0u32;
        for (kind, algorithm) in &pairs {
            let record = self.create_record(*kind, algorithm, now)?;
            records.push(record);
            created += 1;
        }

        self.persist_locked(&records)?;
        tracing::info!(created, "key rotation completed");
        Ok(created)
    }

    /// Set the lifetime applied to new keys. Rejects anything below the
    /// one-hour floor; existing keys are unaffected.
    pub fn set_key_lifetime(&self, seconds: u64) -> Result<(), ConfigError> {
        if seconds < MIN_KEY_LIFETIME_SECS {
            return Err(ConfigError::LifetimeTooShort {
                requested_secs: seconds,
                floor_secs: MIN_KEY_LIFETIME_SECS,
            });
        }
        *self.lifetime.lock().unwrap() = StdDuration::from_secs(seconds);
        Ok(())
    }

    /// Halve the current default lifetime, clamped to the floor. Used by
    /// the blocking threat response.
    pub fn halve_key_lifetime(&self) {
        let mut lifetime = self.lifetime.lock().unwrap();
        let halved = (lifetime.as_secs() / 2).max(MIN_KEY_LIFETIME_SECS);
        *lifetime = StdDuration::from_secs(halved);
        tracing::info!(lifetime_secs = halved, "key lifetime halved");
    }

    /// Lifetime currently applied to new keys.
    pub fn current_lifetime(&self) -> StdDuration {
        *self.lifetime.lock().unwrap()
    }

    /// Purge material from records whose expiry plus grace window has
    /// passed. Tombstones stay behind so later lookups can distinguish
    /// "purged" from "never existed". Returns the number purged.
    pub fn clean_expired_keys(&self) -> Result<u32, CryptoError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let mut purged = 0u32;
        for r in records.iter_mut() {
            if r.is_purged() {
                continue;
            }
            let cutoff = r
                .expires_at
                .checked_add_signed(self.grace)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if cutoff < now {
                r.purge(now);
                purged += 1;
                tracing::info!(key_id = %r.id, "key material purged");
            }
        }
        if purged > 0 {
            self.persist_locked(&records)?;
        }
        Ok(purged)
    }

    fn persist_locked(&self, records: &[KeyRecord]) -> Result<(), CryptoError> {
        self.store.persist(records).map_err(CryptoError::Persistence)
    }
}

/// `now + lifetime`, saturating at the calendar maximum.
fn expiry(now: DateTime<Utc>, lifetime: StdDuration) -> DateTime<Utc> {
    expiry_after(now, Duration::from_std(lifetime).unwrap_or(Duration::MAX))
}

fn expiry_after(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
