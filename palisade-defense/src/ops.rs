//! Tiered cryptographic operations over managed keys.
//!
//! Decryption runs its checks in a fixed order: key resolution, the
//! algorithm header, AEAD tag, then the plaintext integrity hash. The
//! first failure wins and no partial plaintext ever escapes.

use std::sync::Arc;

use chrono::Utc;
use palisade_cipher::tier::{AeadSuite, SecurityLevel, SignatureSuite};
use palisade_cipher::{aead, hash, sign};
use subtle::ConstantTimeEq;

use crate::error::{ConfigError, CryptoError, PersistenceError};
use crate::lifecycle::KeyLifecycleManager;
use crate::types::{EncryptedPayload, Signature};

/// Stateless operations facade. Keys come from the lifecycle manager on
/// every call, so rotation and purge take effect immediately.
pub struct CryptoOperationsService {
    keys: Arc<KeyLifecycleManager>,
}

impl CryptoOperationsService {
    pub fn new(keys: Arc<KeyLifecycleManager>) -> Self {
        Self { keys }
    }

    /// The lifecycle manager behind this service.
    pub fn key_manager(&self) -> &Arc<KeyLifecycleManager> {
        &self.keys
    }

    /// Encrypt `data` at `level`. Selects the level's AEAD suite, finds
    /// or creates a matching key, and binds key id, algorithm, and level
    /// into the associated data.
    pub fn encrypt(&self, data: &[u8], level: u8) -> Result<EncryptedPayload, CryptoError> {
        let tier = SecurityLevel::new(level)
            .map_err(|_| ConfigError::InvalidLevel(level))?;
        let suite = tier.aead();
        let key = self.keys.get_or_create_encryption_key(suite.id())?;

        let nonce = aead::nonce().map_err(|_| CryptoError::Entropy)?;
        let aad = aead::binding_aad(key.id.as_str(), suite.id(), tier.value());
        let mut sealed = aead::seal(suite, key.key_material.as_bytes(), &nonce, data, &aad)
            .map_err(|_| malformed_material())?;
        if sealed.len() < aead::TAG_BYTES {
            return Err(malformed_material());
        }
        let auth_tag = sealed.split_off(sealed.len() - aead::TAG_BYTES);

        let digest = hash::digest(tier.digest(), data);
        Ok(EncryptedPayload {
            ciphertext: sealed,
            nonce: nonce.to_vec(),
            auth_tag,
            key_id: key.id.clone(),
            algorithm: suite.id().to_string(),
            security_level: tier.value(),
            data_integrity_hash: hex::encode(digest),
            created_at: Utc::now(),
        })
    }

    /// Decrypt a payload. See the module docs for the check order.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        let key = self.keys.get_decryption_key(&payload.key_id)?;

        if key.algorithm != payload.algorithm {
            return Err(CryptoError::AlgorithmMismatch {
                expected: key.algorithm.clone(),
                declared: payload.algorithm.clone(),
            });
        }

        // A malformed level or nonce in a received payload is treated as
        // tampering, not caller misconfiguration.
        let tier = SecurityLevel::new(payload.security_level)
            .map_err(|_| CryptoError::IntegrityViolation)?;
        let suite =
            AeadSuite::from_id(&payload.algorithm).ok_or(CryptoError::IntegrityViolation)?;
        let nonce: [u8; aead::NONCE_BYTES] = payload
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::IntegrityViolation)?;

        let aad = aead::binding_aad(payload.key_id.as_str(), &payload.algorithm, tier.value());
        let mut sealed = Vec::with_capacity(payload.ciphertext.len() + payload.auth_tag.len());
        sealed.extend_from_slice(&payload.ciphertext);
        sealed.extend_from_slice(&payload.auth_tag);

        let plaintext = aead::open(suite, key.key_material.as_bytes(), &nonce, &sealed, &aad)
            .map_err(|_| {
                tracing::warn!(key_id = %payload.key_id, "payload failed authentication");
                CryptoError::IntegrityViolation
            })?;

        // Secondary check over the recovered plaintext.
        let digest = hex::encode(hash::digest(tier.digest(), &plaintext));
        if digest.as_bytes().ct_eq(payload.data_integrity_hash.as_bytes()).unwrap_u8() != 1 {
            tracing::warn!(key_id = %payload.key_id, "payload integrity hash mismatch");
            return Err(CryptoError::IntegrityViolation);
        }

        Ok(plaintext)
    }

    /// Sign `data` at `level` with the level's signature suite.
    pub fn sign(&self, data: &[u8], level: u8) -> Result<Signature, CryptoError> {
        let tier = SecurityLevel::new(level)
            .map_err(|_| ConfigError::InvalidLevel(level))?;
        let suite = tier.signature();
        let key = self.keys.get_or_create_signing_key(suite.id())?;

        let sig = sign::sign(suite, key.key_material.as_bytes(), data)
            .map_err(|_| malformed_material())?;
        let digest = hash::digest(tier.digest(), data);
        Ok(Signature {
            signature_bytes: sig.to_vec(),
            key_id: key.id.clone(),
            algorithm: suite.id().to_string(),
            security_level: tier.value(),
            data_hash: hex::encode(digest),
            created_at: Utc::now(),
        })
    }

    /// Verify a signature against `data`. Returns `false` for every
    /// failure mode; this method never errors.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        let key = match self.keys.get_verification_key(&signature.key_id) {
            Ok(k) => k,
            Err(_) => return false,
        };
        if key.algorithm != signature.algorithm {
            return false;
        }
        let suite = match SignatureSuite::from_id(&signature.algorithm) {
            Some(s) => s,
            None => return false,
        };
        let tier = match SecurityLevel::new(signature.security_level) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let public = match key.verification_bytes() {
            Some(p) => p,
            None => return false,
        };

        // The declared hash must match the data before the curve check.
        let digest = hex::encode(hash::digest(tier.digest(), data));
        if digest.as_bytes().ct_eq(signature.data_hash.as_bytes()).unwrap_u8() != 1 {
            return false;
        }
        sign::verify(suite, &public, data, &signature.signature_bytes)
    }
}

/// Stored key material that no longer fits its algorithm is a store
/// consistency failure, not a caller error.
fn malformed_material() -> CryptoError {
    CryptoError::Persistence(PersistenceError("key material malformed".into()))
}
