//! # Palisade Defense
//!
//! Adaptive cryptographic defense core.
//!
//! Ties together tiered cryptographic operations (built on
//! `palisade-cipher`), managed key lifecycle with rotation and purge,
//! multi-model threat scoring, and an orchestrator that hardens the
//! encryption posture when attacks are detected: hostile traffic gets
//! blocked, keys get rotated, lifetimes get halved.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use palisade_defense::{CryptoOperationsService, KeyLifecycleManager, MemoryKeyStore};
//!
//! # fn main() -> Result<(), palisade_defense::CryptoError> {
//! let keys = Arc::new(KeyLifecycleManager::new(Arc::new(MemoryKeyStore::new()))?);
//! let crypto = CryptoOperationsService::new(keys);
//!
//! let payload = crypto.encrypt(b"rotate the fleet keys", 3)?;
//! assert_eq!(crypto.decrypt(&payload)?, b"rotate the fleet keys");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod intel;
pub mod lifecycle;
pub mod notify;
pub mod ops;
pub mod orchestrator;
pub mod scoring;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use error::{ConfigError, CryptoError, PersistenceError};
pub use intel::{CachedThreatIntel, IndicatorSet, IntelModel, StaticIntel, ThreatIntelProvider};
pub use lifecycle::{KeyLifecycleManager, LifecycleConfig};
pub use notify::{
    ChainedNotifier, ChannelKind, FileNotifier, InMemoryNotifier, NotificationSender,
    ThreatNotification, TracingNotifier,
};
pub use ops::CryptoOperationsService;
pub use orchestrator::{
    DefenseConfig, DefenseOrchestrator, HistoryFilters, RateLimitDirective, ResponseAction,
    ResponseDetails, ResponseRecord, ThreatDetectionRecord, ThreatStatistics,
};
pub use scoring::{
    AnomalyModel, FeatureVector, ModelScore, NormalizedRequest, RawRequest, RuleBasedModel,
    ThreatScoringEngine, ThreatScoringModel, ThreatVerdict, TrainingSample,
};
pub use store::{
    EncryptedFileStore, FileHistoryStore, HistoryStore, KeyStore, MasterKey, MemoryHistoryStore,
    MemoryKeyStore,
};
pub use types::{EncryptedPayload, KeyId, KeyKind, KeyMaterial, KeyRecord, Signature};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::DEFAULT_GRACE_WINDOW_SECS;
    use crate::orchestrator::{RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECS};
    use chrono::Utc;
    use sha2::{Digest, Sha256};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn test_manager() -> Arc<KeyLifecycleManager> {
        Arc::new(KeyLifecycleManager::new(Arc::new(MemoryKeyStore::new())).unwrap())
    }

    fn test_crypto() -> Arc<CryptoOperationsService> {
        Arc::new(CryptoOperationsService::new(test_manager()))
    }

    fn orchestrator_with_config(
        config: DefenseConfig,
    ) -> (DefenseOrchestrator, Arc<InMemoryNotifier>) {
        let notifier = Arc::new(InMemoryNotifier::new());
        let orch = DefenseOrchestrator::new(
            config,
            ThreatScoringEngine::new().with_model(Box::new(AnomalyModel::new())),
            test_crypto(),
            Arc::new(MemoryHistoryStore::new()),
            notifier.clone(),
        )
        .unwrap();
        (orch, notifier)
    }

    fn test_orchestrator() -> (DefenseOrchestrator, Arc<InMemoryNotifier>) {
        orchestrator_with_config(DefenseConfig::default())
    }

    fn hostile_request() -> RawRequest {
        RawRequest {
            ip: Some("203.0.113.7".to_string()),
            method: Some("POST".to_string()),
            uri: Some("/login".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            payload: Some("1' UNION SELECT password FROM users--".to_string()),
            session_data: Some(BTreeMap::from([("request_frequency".to_string(), 250.0)])),
            ..Default::default()
        }
    }

    fn benign_request() -> RawRequest {
        RawRequest {
            ip: Some("198.51.100.20".to_string()),
            method: Some("GET".to_string()),
            uri: Some("/index.html".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            payload: Some("hello".to_string()),
            ..Default::default()
        }
    }

    // === Key Lifecycle ===

    #[test]
    fn test_generate_key_pair() {
        let mgr = test_manager();
        let record = mgr.generate_key_pair().unwrap();

        assert_eq!(record.kind, KeyKind::Keypair);
        assert_eq!(record.algorithm, "x25519");
        assert_eq!(record.key_material.len(), 32);
        assert_eq!(record.public_hex.as_ref().unwrap().len(), 64);
        assert!(!record.is_purged());
        assert!(record.expires_at > record.created_at);
        assert!(record.entropy_quality > 0.0);
    }

    #[test]
    fn test_generate_key_pair_hybrid_at_high_level() {
        let config = LifecycleConfig {
            default_level: 5,
            ..Default::default()
        };
        let mgr = KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config).unwrap();
        let record = mgr.generate_key_pair().unwrap();

        assert_eq!(record.algorithm, "x25519-mlkem768");
        // ML-KEM-768 decapsulation key plus X25519 scalar.
        assert_eq!(record.key_material.len(), 2400 + 32);
        assert_eq!(record.public_hex.as_ref().unwrap().len(), 2 * (1184 + 32));
    }

    #[test]
    fn test_get_or_create_reuses_live_key() {
        let mgr = test_manager();
        let a = mgr.get_or_create_encryption_key("aes-256-gcm").unwrap();
        let b = mgr.get_or_create_encryption_key("aes-256-gcm").unwrap();
        assert_eq!(a.id, b.id);

        // Different algorithm gets its own key.
        let c = mgr.get_or_create_encryption_key("aes-128-gcm").unwrap();
        assert_ne!(a.id, c.id);
        assert_eq!(mgr.list_keys().len(), 2);
    }

    #[test]
    fn test_keys_persist_across_instances() {
        let store = Arc::new(MemoryKeyStore::new());
        let first = KeyLifecycleManager::new(store.clone()).unwrap();
        let key = first.get_or_create_encryption_key("aes-256-gcm").unwrap();
        drop(first);

        let second = KeyLifecycleManager::new(store).unwrap();
        let again = second.get_or_create_encryption_key("aes-256-gcm").unwrap();
        assert_eq!(key.id, again.id);
    }

    #[test]
    fn test_import_verification_key() {
        let mgr = test_manager();
        let public = [7u8; 32];
        let imported = mgr.import_verification_key("ed25519", &public).unwrap();

        assert_eq!(imported.kind, KeyKind::Verification);
        assert_eq!(imported.entropy_quality, 0.0);
        let fetched = mgr.get_verification_key(&imported.id).unwrap();
        assert_eq!(fetched.verification_bytes().unwrap(), public.to_vec());
    }

    #[test]
    fn test_import_verification_key_rejects_unknown_suite() {
        let mgr = test_manager();
        assert!(matches!(
            mgr.import_verification_key("rsa-2048", &[0u8; 32]),
            Err(CryptoError::Config(ConfigError::UnknownAlgorithm(_)))
        ));
    }

    #[test]
    fn test_import_verification_key_rejects_bad_length() {
        let mgr = test_manager();
        match mgr.import_verification_key("ed25519", &[0u8; 31]) {
            Err(CryptoError::Config(ConfigError::MalformedKey { expected, got })) => {
                assert_eq!(expected, 32);
                assert_eq!(got, 31);
            }
            other => panic!("expected malformed key error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_rejects_invalid_level() {
        let config = LifecycleConfig {
            default_level: 0,
            ..Default::default()
        };
        assert!(matches!(
            KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config),
            Err(CryptoError::Config(ConfigError::InvalidLevel(0)))
        ));
    }

    #[test]
    fn test_config_rejects_short_lifetime() {
        let config = LifecycleConfig {
            default_lifetime: StdDuration::from_secs(10),
            ..Default::default()
        };
        assert!(matches!(
            KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config),
            Err(CryptoError::Config(ConfigError::LifetimeTooShort { .. }))
        ));
    }

    #[test]
    fn test_entropy_floor_enforced() {
        // Quality is capped at 1.0, so a floor above it can never be met.
        let config = LifecycleConfig {
            require_entropy_quality: Some(1.01),
            ..Default::default()
        };
        let mgr = KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config).unwrap();
        assert!(matches!(
            mgr.get_or_create_encryption_key("aes-256-gcm"),
            Err(CryptoError::Config(ConfigError::EntropyBelowFloor { .. }))
        ));
    }

    #[test]
    fn test_key_material_debug_redacted() {
        let material = KeyMaterial::new(vec![0xAA; 32]);
        let debug = format!("{:?}", material);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("aa"));
        assert!(!debug.contains("AA"));
    }

    #[test]
    fn test_purge_clears_material_and_public() {
        let now = Utc::now();
        let mut record = KeyRecord {
            id: KeyId::generate(),
            kind: KeyKind::Signing,
            algorithm: "ed25519".to_string(),
            key_material: KeyMaterial::new(vec![1u8; 32]),
            public_hex: Some("ab".repeat(32)),
            created_at: now,
            expires_at: now,
            purged_at: None,
            entropy_quality: 0.9,
        };
        record.purge(now);

        assert!(record.is_purged());
        assert!(record.key_material.is_empty());
        assert_eq!(record.public_hex, None);
        assert_eq!(record.verification_bytes(), None);
    }

    // === Rotation and Expiry ===

    #[test]
    fn test_lifetime_floor() {
        let mgr = test_manager();
        match mgr.set_key_lifetime(1800) {
            Err(ConfigError::LifetimeTooShort {
                requested_secs,
                floor_secs,
            }) => {
                assert_eq!(requested_secs, 1800);
                assert_eq!(floor_secs, 3600);
            }
            other => panic!("expected lifetime floor error, got {:?}", other),
        }
        mgr.set_key_lifetime(7200).unwrap();
        assert_eq!(mgr.current_lifetime(), StdDuration::from_secs(7200));
    }

    #[test]
    fn test_halve_key_lifetime_clamps_at_floor() {
        let mgr = test_manager();
        mgr.set_key_lifetime(7200).unwrap();
        mgr.halve_key_lifetime();
        assert_eq!(mgr.current_lifetime(), StdDuration::from_secs(3600));
        mgr.halve_key_lifetime();
        assert_eq!(mgr.current_lifetime(), StdDuration::from_secs(3600));
    }

    #[test]
    fn test_rotate_all_keys_replaces_live_pairs() {
        let mgr = test_manager();
        let enc = mgr.get_or_create_encryption_key("aes-256-gcm").unwrap();
        let sig = mgr.get_or_create_signing_key("ed25519").unwrap();
        let imported = mgr.import_verification_key("ed25519", &[9u8; 32]).unwrap();

        let rotated = mgr.rotate_all_keys().unwrap();
        assert_eq!(rotated, 2);

        let keys = mgr.list_keys();
        assert_eq!(keys.len(), 5);

        // Superseded keys were shortened to the grace horizon.
        let grace_horizon =
            Utc::now() + chrono::Duration::seconds((DEFAULT_GRACE_WINDOW_SECS + 60) as i64);
        let old_enc = keys.iter().find(|k| k.id == enc.id).unwrap();
        let old_sig = keys.iter().find(|k| k.id == sig.id).unwrap();
        assert!(old_enc.expires_at <= grace_horizon);
        assert!(old_sig.expires_at <= grace_horizon);
        assert!(!old_enc.is_purged());

        // Replacements carry full lifetimes.
        let new_enc = keys
            .iter()
            .find(|k| k.kind == KeyKind::Encryption && k.id != enc.id)
            .unwrap();
        assert!(new_enc.expires_at > grace_horizon);

        // Imported verification keys are left alone.
        let vk = keys.iter().find(|k| k.id == imported.id).unwrap();
        assert_eq!(vk.expires_at, imported.expires_at);
    }

    #[test]
    fn test_rotation_never_extends_expiry() {
        // A key expiring sooner than the grace horizon keeps its expiry.
        let config = LifecycleConfig {
            default_lifetime: StdDuration::from_secs(3 * 86400),
            ..Default::default()
        };
        let mgr = KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config).unwrap();
        let key = mgr.get_or_create_encryption_key("aes-256-gcm").unwrap();

        mgr.rotate_all_keys().unwrap();
        let after = mgr.list_keys().into_iter().find(|k| k.id == key.id).unwrap();
        assert_eq!(after.expires_at, key.expires_at);
    }

    #[test]
    fn test_purged_key_rejects_decryption() {
        let config = LifecycleConfig {
            grace_window: StdDuration::from_secs(0),
            ..Default::default()
        };
        let mgr =
            Arc::new(KeyLifecycleManager::with_config(Arc::new(MemoryKeyStore::new()), config).unwrap());
        let crypto = CryptoOperationsService::new(Arc::clone(&mgr));
        let payload = crypto.encrypt(b"short lived", 3).unwrap();

        // Rotation pulls the key's expiry to now; with a zero grace window
        // the next sweep purges it.
        mgr.rotate_all_keys().unwrap();
        std::thread::sleep(StdDuration::from_millis(5));
        let purged = mgr.clean_expired_keys().unwrap();
        assert!(purged >= 1);

        match crypto.decrypt(&payload) {
            Err(CryptoError::KeyExpiredPurged(id)) => assert_eq!(id, payload.key_id),
            other => panic!("expected purged-key error, got {:?}", other),
        }
    }

    #[test]
    fn test_decrypt_survives_rotation() {
        let crypto = test_crypto();
        let payload = crypto.encrypt(b"before rotation", 3).unwrap();
        crypto.key_manager().rotate_all_keys().unwrap();

        // The superseded key is inside its grace window, so old payloads
        // still open while new encryptions use the replacement.
        assert_eq!(crypto.decrypt(&payload).unwrap(), b"before rotation");
        let fresh = crypto.encrypt(b"after rotation", 3).unwrap();
        assert_ne!(fresh.key_id, payload.key_id);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let mgr = test_manager();
        let missing = KeyId::generate();
        assert!(matches!(
            mgr.get_decryption_key(&missing),
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    // === Crypto Operations ===

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = test_crypto();
        let payload = crypto.encrypt(b"hello world", 3).unwrap();

        assert_eq!(payload.security_level, 3);
        assert_eq!(payload.algorithm, "aes-256-gcm");
        assert_eq!(payload.nonce.len(), 12);
        assert_eq!(payload.auth_tag.len(), 16);
        assert_eq!(payload.ciphertext.len(), b"hello world".len());
        assert_eq!(crypto.decrypt(&payload).unwrap(), b"hello world");
    }

    #[test]
    fn test_roundtrip_all_levels() {
        let crypto = test_crypto();
        for (level, algorithm) in [
            (1u8, "aes-128-gcm"),
            (2, "aes-128-gcm"),
            (3, "aes-256-gcm"),
            (4, "aes-256-gcm"),
            (5, "aes-256-gcm"),
        ] {
            let payload = crypto.encrypt(b"tiered data", level).unwrap();
            assert_eq!(payload.algorithm, algorithm);
            assert_eq!(crypto.decrypt(&payload).unwrap(), b"tiered data");
        }
    }

    #[test]
    fn test_encrypt_rejects_invalid_level() {
        let crypto = test_crypto();
        for level in [0u8, 6, 255] {
            assert!(matches!(
                crypto.encrypt(b"x", level),
                Err(CryptoError::Config(ConfigError::InvalidLevel(_)))
            ));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let crypto = test_crypto();
        let mut payload = crypto.encrypt(b"sensitive", 4).unwrap();
        payload.ciphertext[0] ^= 0x01;
        assert!(matches!(
            crypto.decrypt(&payload),
            Err(CryptoError::IntegrityViolation)
        ));
    }

    #[test]
    fn test_tampered_auth_tag_fails() {
        let crypto = test_crypto();
        let mut payload = crypto.encrypt(b"sensitive", 4).unwrap();
        payload.auth_tag[15] ^= 0x80;
        assert!(matches!(
            crypto.decrypt(&payload),
            Err(CryptoError::IntegrityViolation)
        ));
    }

    #[test]
    fn test_tampered_integrity_hash_fails() {
        let crypto = test_crypto();
        let mut payload = crypto.encrypt(b"sensitive", 4).unwrap();
        let mut hash = payload.data_integrity_hash.clone().into_bytes();
        hash[0] = if hash[0] == b'0' { b'1' } else { b'0' };
        payload.data_integrity_hash = String::from_utf8(hash).unwrap();
        assert!(matches!(
            crypto.decrypt(&payload),
            Err(CryptoError::IntegrityViolation)
        ));
    }

    #[test]
    fn test_malformed_payload_fields_fail() {
        let crypto = test_crypto();
        let good = crypto.encrypt(b"sensitive", 3).unwrap();

        // An out-of-range level in a received payload is tampering.
        let mut bad_level = good.clone();
        bad_level.security_level = 0;
        assert!(matches!(
            crypto.decrypt(&bad_level),
            Err(CryptoError::IntegrityViolation)
        ));

        let mut bad_nonce = good.clone();
        bad_nonce.nonce.truncate(4);
        assert!(matches!(
            crypto.decrypt(&bad_nonce),
            Err(CryptoError::IntegrityViolation)
        ));
    }

    #[test]
    fn test_algorithm_mismatch_detected() {
        let crypto = test_crypto();
        let mut payload = crypto.encrypt(b"data", 3).unwrap();
        payload.algorithm = "aes-128-gcm".to_string();
        match crypto.decrypt(&payload) {
            Err(CryptoError::AlgorithmMismatch { expected, declared }) => {
                assert_eq!(expected, "aes-256-gcm");
                assert_eq!(declared, "aes-128-gcm");
            }
            other => panic!("expected algorithm mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_serialization_roundtrip() {
        let crypto = test_crypto();
        let payload = crypto.encrypt(b"wire format", 2).unwrap();
        let json = serde_json::to_string(&payload).unwrap();

        // Byte fields travel hex-encoded.
        assert!(json.contains(&hex::encode(&payload.nonce)));
        let back: EncryptedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(crypto.decrypt(&back).unwrap(), b"wire format");
    }

    // === Signing ===

    #[test]
    fn test_sign_verify_roundtrip() {
        let crypto = test_crypto();
        let signature = crypto.sign(b"release artifact", 3).unwrap();

        assert_eq!(signature.algorithm, "ed25519");
        assert_eq!(signature.signature_bytes.len(), 64);
        assert!(crypto.verify(b"release artifact", &signature));
        assert!(!crypto.verify(b"release artifact.", &signature));
    }

    #[test]
    fn test_sign_uses_prehash_at_high_levels() {
        let crypto = test_crypto();
        let signature = crypto.sign(b"firmware image", 5).unwrap();
        assert_eq!(signature.algorithm, "ed25519ph");
        assert!(crypto.verify(b"firmware image", &signature));
    }

    #[test]
    fn test_verify_rejects_unknown_key() {
        let crypto = test_crypto();
        let signature = crypto.sign(b"data", 3).unwrap();

        // A service over a different keyring has never seen this key.
        let other = test_crypto();
        assert!(!other.verify(b"data", &signature));
    }

    #[test]
    fn test_verify_rejects_tampered_hash() {
        let crypto = test_crypto();
        let mut signature = crypto.sign(b"data", 3).unwrap();
        let mut hash = signature.data_hash.clone().into_bytes();
        hash[0] = if hash[0] == b'0' { b'1' } else { b'0' };
        signature.data_hash = String::from_utf8(hash).unwrap();
        assert!(!crypto.verify(b"data", &signature));
    }

    #[test]
    fn test_verify_rejects_cross_level_claim() {
        let crypto = test_crypto();
        let mut signature = crypto.sign(b"data", 3).unwrap();
        // Claiming a different level changes the digest suite, so the
        // declared hash no longer matches.
        signature.security_level = 4;
        assert!(!crypto.verify(b"data", &signature));
    }

    // === Threat Scoring ===

    #[test]
    fn test_sql_injection_detected() {
        let engine = ThreatScoringEngine::new();
        let verdict = engine.detect_threats(&hostile_request().normalize());

        assert!(verdict.threat_level >= 4);
        assert!(verdict.threat_types.contains("sql_injection"));
        assert!(verdict.threat_types.contains("rate_anomaly"));
        assert!(verdict.confidence > 0.5);
    }

    #[test]
    fn test_benign_request_scores_low() {
        let engine = ThreatScoringEngine::new();
        let verdict = engine.detect_threats(&benign_request().normalize());
        assert_eq!(verdict.threat_level, 1);
        assert!(verdict.threat_types.is_empty());
    }

    #[test]
    fn test_default_request_is_bounded() {
        // An all-defaults request normalizes and scores without panicking.
        let engine = ThreatScoringEngine::new();
        let verdict = engine.detect_threats(&RawRequest::default().normalize());
        assert!((1..=5).contains(&verdict.threat_level));
        assert!((0.0..=1.0).contains(&verdict.confidence));
        // The empty user agent is itself a (mild) signal.
        assert!(verdict.threat_types.contains("missing_user_agent"));
    }

    struct FixedModel {
        level: u8,
        confidence: f64,
        kind: &'static str,
    }

    impl ThreatScoringModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&self, _features: &FeatureVector, _request: &NormalizedRequest) -> ModelScore {
            let mut types = BTreeSet::new();
            types.insert(self.kind.to_string());
            ModelScore {
                threat_level: self.level,
                threat_types: types,
                confidence: self.confidence,
            }
        }

        fn update(&self, _sample: &TrainingSample, _learning_rate: f64) {}
    }

    #[test]
    fn test_fusion_takes_maximum() {
        let engine = ThreatScoringEngine::new()
            .with_model(Box::new(FixedModel {
                level: 5,
                confidence: 0.3,
                kind: "model_a",
            }))
            .with_model(Box::new(FixedModel {
                level: 2,
                confidence: 0.9,
                kind: "model_b",
            }));
        let verdict = engine.detect_threats(&benign_request().normalize());

        assert_eq!(verdict.threat_level, 5);
        assert!(verdict.confidence >= 0.9);
        assert!(verdict.threat_types.contains("model_a"));
        assert!(verdict.threat_types.contains("model_b"));
    }

    #[test]
    fn test_fusion_clamps_out_of_range_models() {
        let engine = ThreatScoringEngine::new().with_model(Box::new(FixedModel {
            level: 9,
            confidence: 7.5,
            kind: "loud",
        }));
        let verdict = engine.detect_threats(&benign_request().normalize());
        assert_eq!(verdict.threat_level, 5);
        assert!(verdict.confidence <= 1.0);
    }

    #[test]
    fn test_anomaly_model_cold_start_silent() {
        let engine = ThreatScoringEngine::new();
        let request = hostile_request().normalize();
        let features = engine.extract_features(&request);

        let model = AnomalyModel::new();
        let score = model.score(&features, &request);
        assert_eq!(score.threat_level, 1);
        assert_eq!(score.confidence, 0.0);
    }

    #[test]
    fn test_anomaly_model_flags_deviation() {
        let engine = ThreatScoringEngine::new();
        let request = benign_request().normalize();
        let features = engine.extract_features(&request);

        let model = AnomalyModel::new();
        let sample = TrainingSample {
            features: features.clone(),
            threat_level: 1,
            confidence: 0.2,
            effective: None,
        };
        for _ in 0..20 {
            model.update(&sample, 0.1);
        }
        assert_eq!(model.observations(), 20);

        // Its own traffic profile scores as normal.
        assert_eq!(model.score(&features, &request).threat_level, 1);

        // A wildly different request deviates on size and frequency.
        let odd = RawRequest {
            payload: Some("A".repeat(50_000)),
            session_data: Some(BTreeMap::from([("request_frequency".to_string(), 5000.0)])),
            ..Default::default()
        }
        .normalize();
        let odd_features = engine.extract_features(&odd);
        let score = model.score(&odd_features, &odd);
        assert!(score.threat_level >= 2);
        assert!(score.threat_types.contains("behavioral_anomaly"));
    }

    #[test]
    fn test_feature_extraction_deterministic() {
        let engine = ThreatScoringEngine::new();
        let request = hostile_request().normalize();
        assert_eq!(
            engine.extract_features(&request),
            engine.extract_features(&request)
        );
    }

    #[test]
    fn test_ipv4_feature_is_numeric() {
        let engine = ThreatScoringEngine::new();
        let request = RawRequest {
            ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        }
        .normalize();
        let features = engine.extract_features(&request);
        assert_eq!(
            features.ip_numeric,
            f64::from(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn test_engine_always_has_baseline() {
        let engine = ThreatScoringEngine::new().with_model(Box::new(AnomalyModel::new()));
        let names = engine.model_names();
        assert!(names.contains(&"rule-baseline"));
        assert!(names.contains(&"ewma-anomaly"));
    }

    // === Threat Intel ===

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl ThreatIntelProvider for CountingProvider {
        fn fetch(&self) -> IndicatorSet {
            self.calls.fetch_add(1, Ordering::SeqCst);
            IndicatorSet {
                bad_ips: BTreeSet::from(["203.0.113.9".to_string()]),
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_cached_intel_fetches_once() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedThreatIntel::new(provider.clone(), StdDuration::from_secs(3600));

        let a = cached.current();
        let b = cached.current();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.bad_ips, b.bad_ips);

        cached.force_refresh();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cached_intel_zero_ttl_refetches() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedThreatIntel::new(provider.clone(), StdDuration::from_secs(0));
        cached.current();
        cached.current();
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_intel_model_flags_bad_ip() {
        let mut indicators = IndicatorSet::default();
        indicators.bad_ips.insert("203.0.113.7".to_string());
        let cached = CachedThreatIntel::new(
            Arc::new(StaticIntel::new(indicators)),
            StdDuration::from_secs(3600),
        );
        let model = IntelModel::new(cached);

        let engine = ThreatScoringEngine::new();
        let request = hostile_request().normalize();
        let score = model.score(&engine.extract_features(&request), &request);
        assert_eq!(score.threat_level, 4);
        assert!(score.threat_types.contains("known_hostile_source"));

        let clean = benign_request().normalize();
        let quiet = model.score(&engine.extract_features(&clean), &clean);
        assert_eq!(quiet.threat_level, 1);
        assert_eq!(quiet.confidence, 0.0);
    }

    #[test]
    fn test_builtin_intel_flags_recon_uri() {
        let cached = CachedThreatIntel::new(
            Arc::new(StaticIntel::builtin()),
            StdDuration::from_secs(3600),
        );
        let model = IntelModel::new(cached);

        let engine = ThreatScoringEngine::new();
        let request = RawRequest {
            uri: Some("/.env".to_string()),
            user_agent: Some("zgrab/0.x".to_string()),
            ..Default::default()
        }
        .normalize();
        let score = model.score(&engine.extract_features(&request), &request);
        assert_eq!(score.threat_level, 3);
        assert!(score.threat_types.contains("recon_uri"));
        assert!(score.threat_types.contains("scanner"));
    }

    // === Orchestrator ===

    #[test]
    fn test_hostile_request_triggers_block() {
        let (orch, notifier) = test_orchestrator();
        let verdict = orch.analyze_request(hostile_request()).unwrap();

        assert!(verdict.threat_level >= 4);
        assert!(verdict.threat_types.contains("sql_injection"));

        let history = orch.get_detection_history(&HistoryFilters::default(), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action_taken, Some(ResponseAction::Block));
        assert!(history[0].threat_level >= 4);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, ChannelKind::Dashboard);
        assert_eq!(sent[0].action, "block");
    }

    #[test]
    fn test_block_response_rotates_keys() {
        let mgr = Arc::new(KeyLifecycleManager::new(Arc::new(MemoryKeyStore::new())).unwrap());
        let crypto = Arc::new(CryptoOperationsService::new(Arc::clone(&mgr)));
        let orch = DefenseOrchestrator::new(
            DefenseConfig::default(),
            ThreatScoringEngine::new(),
            crypto,
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(InMemoryNotifier::new()),
        )
        .unwrap();

        let lifetime_before = mgr.current_lifetime();
        orch.analyze_request(hostile_request()).unwrap();

        // The block tier rotated the history key and halved the lifetime.
        assert!(mgr.current_lifetime() < lifetime_before);
        assert!(mgr.list_keys().len() >= 2);
    }

    #[test]
    fn test_benign_request_recorded_without_response() {
        let (orch, notifier) = test_orchestrator();
        let verdict = orch.analyze_request(benign_request()).unwrap();

        assert_eq!(verdict.threat_level, 1);
        let history = orch.get_detection_history(&HistoryFilters::default(), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action_taken, None);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_auto_response_disabled_never_responds() {
        let config = DefenseConfig {
            auto_response: false,
            ..Default::default()
        };
        let (orch, notifier) = orchestrator_with_config(config);
        let verdict = orch.analyze_request(hostile_request()).unwrap();

        assert!(verdict.threat_level >= 4);
        let history = orch.get_detection_history(&HistoryFilters::default(), 10);
        assert_eq!(history[0].action_taken, None);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_direct_response_details() {
        let (orch, _) = test_orchestrator();
        let request = hostile_request().normalize();
        let verdict = orch.engine().detect_threats(&request);
        let record = orch.respond_to_threat(&verdict, &request).unwrap();

        assert_eq!(record.action, ResponseAction::Block);
        assert!(record.details.escalation);
        assert!(record.details.encryption_enhanced);
        assert!(record.details.firewall_updated);
        assert!(!record.details.decoy_deployed);
        // No keys minted yet, so an empty keyring rotates to nothing.
        assert_eq!(record.keys_rotated, 0);
    }

    #[test]
    fn test_response_tiering() {
        let config = DefenseConfig {
            adaptive_encryption: false,
            ..Default::default()
        };
        let (orch, _) = orchestrator_with_config(config);
        let request = benign_request().normalize();
        let features = orch.engine().extract_features(&request);

        let mut state = 0xdecafbadu64;
        let mut seen = [0u32; 6];
        for _ in 0..1000 {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let level = ((state >> 33) % 5) as u8 + 1;
            seen[level as usize] += 1;

            let verdict = ThreatVerdict {
                threat_level: level,
                threat_types: BTreeSet::new(),
                confidence: 0.5,
                features: features.clone(),
            };
            let record = orch.respond_to_threat(&verdict, &request).unwrap();
            match level {
                4 | 5 => {
                    assert_eq!(record.action, ResponseAction::Block);
                    assert!(record.details.escalation);
                    assert!(!record.details.encryption_enhanced);
                    assert!(record.details.firewall_updated);
                }
                3 => {
                    assert_eq!(record.action, ResponseAction::Challenge);
                    let limit = record.details.rate_limit.as_ref().unwrap();
                    assert_eq!(limit.window_seconds, RATE_LIMIT_WINDOW_SECS);
                    assert_eq!(limit.max_requests, RATE_LIMIT_MAX_REQUESTS);
                    assert_eq!(limit.source, request.ip);
                }
                _ => {
                    assert_eq!(record.action, ResponseAction::Monitor);
                    assert!(record.details.enhanced_logging);
                    assert!(record.details.rate_limit.is_none());
                }
            }
        }
        // The generator visited every tier.
        assert!(seen[1..].iter().all(|&c| c > 0));
    }

    #[test]
    fn test_response_honors_caller_config_snapshot() {
        let (orch, _) = test_orchestrator();
        let request = benign_request().normalize();
        let verdict = ThreatVerdict {
            threat_level: 3,
            threat_types: BTreeSet::new(),
            confidence: 0.5,
            features: orch.engine().extract_features(&request),
        };

        // Stored config has rate limiting on; a detached snapshot with
        // it off must govern the whole response.
        let mut snapshot = orch.config();
        snapshot.rate_limiting = false;
        let record = orch
            .respond_with_config(&snapshot, &verdict, &request)
            .unwrap();
        assert_eq!(record.action, ResponseAction::Challenge);
        assert!(record.details.rate_limit.is_none());

        // The public entry point snapshots the stored config itself.
        let record = orch.respond_to_threat(&verdict, &request).unwrap();
        assert!(record.details.rate_limit.is_some());
    }

    #[test]
    fn test_history_bounded() {
        let config = DefenseConfig {
            max_history: 40,
            auto_response: false,
            ..Default::default()
        };
        let (orch, _) = orchestrator_with_config(config);
        // 50 routine requests, then 40 with the user agent stripped so
        // the baseline tags the tail batch missing_user_agent at level 2.
        for i in 0..50 {
            let raw = RawRequest {
                ip: Some(format!("198.51.100.{}", i)),
                user_agent: Some("Mozilla/5.0".to_string()),
                ..Default::default()
            };
            orch.analyze_request(raw).unwrap();
        }
        for i in 0..40 {
            let raw = RawRequest {
                ip: Some(format!("203.0.113.{}", i)),
                ..Default::default()
            };
            orch.analyze_request(raw).unwrap();
        }

        assert_eq!(orch.history_len(), 40);
        let survivors = orch.get_detection_history(&HistoryFilters::default(), 80);
        assert_eq!(survivors.len(), 40);
        // Eviction dropped the oldest records, so every survivor comes
        // from the tail batch.
        for record in &survivors {
            assert!(record.threat_types.contains("missing_user_agent"));
            assert!(record.threat_level >= 2);
        }
    }

    #[test]
    fn test_history_filters() {
        let (orch, _) = test_orchestrator();
        orch.analyze_request(benign_request()).unwrap();
        orch.analyze_request(RawRequest {
            payload: Some("<script>alert(1)</script>".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            ..Default::default()
        })
        .unwrap();
        orch.analyze_request(hostile_request()).unwrap();

        let all = orch.get_detection_history(&HistoryFilters::default(), 10);
        assert_eq!(all.len(), 3);

        let severe = orch.get_detection_history(
            &HistoryFilters {
                min_level: Some(3),
                ..Default::default()
            },
            10,
        );
        assert_eq!(severe.len(), 2);

        let sql = orch.get_detection_history(
            &HistoryFilters {
                threat_type: Some("sql_injection".to_string()),
                ..Default::default()
            },
            10,
        );
        assert_eq!(sql.len(), 1);
        assert_eq!(sql[0].action_taken, Some(ResponseAction::Block));

        let recent = orch.get_detection_history(
            &HistoryFilters {
                time_range_seconds: Some(3600),
                ..Default::default()
            },
            10,
        );
        assert_eq!(recent.len(), 3);

        // Limit keeps the most recent matches.
        let last_two = orch.get_detection_history(&HistoryFilters::default(), 2);
        assert_eq!(last_two.len(), 2);
        assert!(last_two[0].threat_level >= 3);
        assert!(last_two[1].threat_level >= 4);
    }

    #[test]
    fn test_threat_statistics() {
        let (orch, _) = test_orchestrator();
        orch.analyze_request(benign_request()).unwrap();
        orch.analyze_request(hostile_request()).unwrap();

        let stats = orch.get_threat_statistics(None);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_level.get(&1), Some(&1));
        assert_eq!(stats.per_level.get(&4), Some(&1));
        assert!(stats.per_type.contains_key("sql_injection"));
        assert_eq!(stats.per_action.get("block"), Some(&1));
        assert_eq!(stats.hourly_distribution.iter().sum::<usize>(), 2);

        let windowed = orch.get_threat_statistics(Some(3600));
        assert_eq!(windowed.total, 2);
    }

    #[test]
    fn test_history_survives_restart() {
        let key_store = Arc::new(MemoryKeyStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());

        let mgr = Arc::new(KeyLifecycleManager::new(key_store.clone()).unwrap());
        let orch = DefenseOrchestrator::new(
            DefenseConfig::default(),
            ThreatScoringEngine::new(),
            Arc::new(CryptoOperationsService::new(mgr)),
            history_store.clone(),
            Arc::new(InMemoryNotifier::new()),
        )
        .unwrap();
        orch.analyze_request(hostile_request()).unwrap();
        orch.analyze_request(benign_request()).unwrap();
        drop(orch);

        // Same stores, new instance: the encrypted history comes back.
        let mgr = Arc::new(KeyLifecycleManager::new(key_store).unwrap());
        let orch = DefenseOrchestrator::new(
            DefenseConfig::default(),
            ThreatScoringEngine::new(),
            Arc::new(CryptoOperationsService::new(mgr)),
            history_store,
            Arc::new(InMemoryNotifier::new()),
        )
        .unwrap();
        assert_eq!(orch.history_len(), 2);
        let history = orch.get_detection_history(&HistoryFilters::default(), 10);
        assert_eq!(history[0].action_taken, Some(ResponseAction::Block));
    }

    #[test]
    fn test_corrupt_history_starts_fresh() {
        let history_store = Arc::new(MemoryHistoryStore::new());
        history_store.persist_blob(b"definitely not json").unwrap();

        let (orch, _) = {
            let notifier = Arc::new(InMemoryNotifier::new());
            let orch = DefenseOrchestrator::new(
                DefenseConfig::default(),
                ThreatScoringEngine::new(),
                test_crypto(),
                history_store,
                notifier.clone(),
            )
            .unwrap();
            (orch, notifier)
        };
        assert_eq!(orch.history_len(), 0);
    }

    #[test]
    fn test_undecryptable_history_starts_fresh() {
        let history_store = Arc::new(MemoryHistoryStore::new());
        {
            let orch = DefenseOrchestrator::new(
                DefenseConfig::default(),
                ThreatScoringEngine::new(),
                test_crypto(),
                history_store.clone(),
                Arc::new(InMemoryNotifier::new()),
            )
            .unwrap();
            orch.analyze_request(hostile_request()).unwrap();
        }

        // A different keyring cannot decrypt the stored blob; the
        // orchestrator logs it and starts empty rather than failing.
        let orch = DefenseOrchestrator::new(
            DefenseConfig::default(),
            ThreatScoringEngine::new(),
            test_crypto(),
            history_store,
            Arc::new(InMemoryNotifier::new()),
        )
        .unwrap();
        assert_eq!(orch.history_len(), 0);
    }

    #[test]
    fn test_set_config_validates() {
        let (orch, _) = test_orchestrator();
        let bad = DefenseConfig {
            sensitivity_level: 0,
            ..Default::default()
        };
        assert!(matches!(
            orch.set_config(bad),
            Err(ConfigError::InvalidLevel(0))
        ));

        let strict = DefenseConfig {
            sensitivity_level: 5,
            ..Default::default()
        };
        orch.set_config(strict).unwrap();
        assert_eq!(orch.config().sensitivity_level, 5);
    }

    #[test]
    fn test_default_config() {
        let config = DefenseConfig::default();
        assert_eq!(config.sensitivity_level, 3);
        assert!(config.auto_response);
        assert_eq!(config.max_history, 1000);
        assert_eq!(config.history_security_level, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: DefenseConfig = serde_json::from_str(r#"{"sensitivity_level": 4}"#).unwrap();
        assert_eq!(config.sensitivity_level, 4);
        assert!(config.auto_response);
        assert_eq!(config.max_history, 1000);
    }

    // === Notifications ===

    #[test]
    fn test_notification_severity_gate() {
        let config = DefenseConfig {
            notify_email: true,
            notify_sms: true,
            notify_webhook: true,
            ..Default::default()
        };
        let (orch, notifier) = orchestrator_with_config(config);

        // Level 3: dashboard and webhook, no paging.
        orch.analyze_request(RawRequest {
            payload: Some("<script>".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            ..Default::default()
        })
        .unwrap();
        let channels: Vec<ChannelKind> = notifier.sent().iter().map(|n| n.channel).collect();
        assert!(channels.contains(&ChannelKind::Dashboard));
        assert!(channels.contains(&ChannelKind::Webhook));
        assert!(!channels.contains(&ChannelKind::Email));
        assert!(!channels.contains(&ChannelKind::Sms));

        // Above level 3 the paging channels open up.
        orch.analyze_request(hostile_request()).unwrap();
        let channels: Vec<ChannelKind> = notifier.sent().iter().map(|n| n.channel).collect();
        assert!(channels.contains(&ChannelKind::Email));
        assert!(channels.contains(&ChannelKind::Sms));
    }

    #[test]
    fn test_notifications_disabled_sends_nothing() {
        let config = DefenseConfig {
            notify_dashboard: false,
            ..Default::default()
        };
        let (orch, notifier) = orchestrator_with_config(config);
        orch.analyze_request(hostile_request()).unwrap();
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_chained_notifier_links() {
        let inner = Arc::new(InMemoryNotifier::new());
        let chained = ChainedNotifier::new(inner.clone());
        for _ in 0..3 {
            chained.send(ThreatNotification {
                timestamp: Utc::now(),
                channel: ChannelKind::Dashboard,
                threat_level: 2,
                threat_types: BTreeSet::new(),
                action: "monitor".to_string(),
                details: "chain test".to_string(),
                sequence: None,
                prev_hash: None,
            });
        }

        let sent = inner.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].sequence, Some(0));
        assert_eq!(sent[1].sequence, Some(1));
        assert_eq!(sent[2].sequence, Some(2));

        let genesis = format!("{:x}", Sha256::digest(b"palisade-notify-genesis"));
        assert_eq!(sent[0].prev_hash.as_deref(), Some(genesis.as_str()));

        // Each link hashes the previous stamped notification.
        let expected = format!(
            "{:x}",
            Sha256::digest(serde_json::to_string(&sent[0]).unwrap().as_bytes())
        );
        assert_eq!(sent[1].prev_hash.as_deref(), Some(expected.as_str()));
        assert_ne!(sent[1].prev_hash, sent[2].prev_hash);
    }
}
