//! Error types for the defense core.
//!
//! The taxonomy is deliberately small. Decrypt-path failures collapse
//! into [`CryptoError::IntegrityViolation`] with no further detail, and
//! no operation ever returns partial plaintext alongside an error.

use std::fmt;

use crate::types::KeyId;

/// A store read or write failed. Persistence failures are fatal to the
/// operation that triggered them; they are never swallowed.
#[derive(Debug, Clone)]
pub struct PersistenceError(pub String);

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persistence error: {}", self.0)
    }
}

impl std::error::Error for PersistenceError {}

/// Invalid caller-supplied configuration, rejected before any state
/// changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Requested key lifetime is below the one-hour floor.
    LifetimeTooShort { requested_secs: u64, floor_secs: u64 },
    /// Security level outside `1..=5`.
    InvalidLevel(u8),
    /// Suite identifier not known to any tier.
    UnknownAlgorithm(String),
    /// Supplied key bytes have the wrong length for the algorithm.
    MalformedKey { expected: usize, got: usize },
    /// Gathered entropy scored below the configured floor.
    EntropyBelowFloor { score: f64, floor: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LifetimeTooShort {
                requested_secs,
                floor_secs,
            } => write!(
                f,
                "key lifetime {}s is below the {}s floor",
                requested_secs, floor_secs
            ),
            ConfigError::InvalidLevel(level) => {
                write!(f, "security level {} outside 1..=5", level)
            }
            ConfigError::UnknownAlgorithm(id) => write!(f, "unknown algorithm: {}", id),
            ConfigError::MalformedKey { expected, got } => {
                write!(f, "key material is {} bytes, expected {}", got, expected)
            }
            ConfigError::EntropyBelowFloor { score, floor } => write!(
                f,
                "entropy quality {:.3} below configured floor {:.3}",
                score, floor
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure of a cryptographic operation.
#[derive(Debug)]
pub enum CryptoError {
    /// Caller-supplied parameter was rejected.
    Config(ConfigError),
    /// No record exists for the referenced key id.
    KeyNotFound(KeyId),
    /// The record exists but its material has been purged.
    KeyExpiredPurged(KeyId),
    /// The key's algorithm does not match what the payload declares.
    AlgorithmMismatch { expected: String, declared: String },
    /// AEAD tag or integrity hash mismatch. Carries no detail.
    IntegrityViolation,
    /// The OS entropy source failed.
    Entropy,
    /// Underlying store failure.
    Persistence(PersistenceError),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::Config(e) => e.fmt(f),
            CryptoError::KeyNotFound(id) => write!(f, "key not found: {}", id),
            CryptoError::KeyExpiredPurged(id) => write!(f, "key material purged: {}", id),
            CryptoError::AlgorithmMismatch { expected, declared } => write!(
                f,
                "algorithm mismatch: key uses {}, payload declares {}",
                expected, declared
            ),
            CryptoError::IntegrityViolation => write!(f, "integrity violation"),
            CryptoError::Entropy => write!(f, "entropy source failure"),
            CryptoError::Persistence(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<ConfigError> for CryptoError {
    fn from(e: ConfigError) -> Self {
        CryptoError::Config(e)
    }
}

impl From<PersistenceError> for CryptoError {
    fn from(e: PersistenceError) -> Self {
        CryptoError::Persistence(e)
    }
}
