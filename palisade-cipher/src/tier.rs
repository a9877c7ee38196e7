//! Security tiers: the mapping from a numeric level to concrete suites.
//!
//! Every operation in the workspace names its strength as a level from 1
//! to 5. The mapping below is pure and total over valid levels, and each
//! suite family never gets weaker as the level rises:
//!
//! | Level | AEAD        | Digest   | Signature | Exchange          |
//! |-------|-------------|----------|-----------|-------------------|
//! | 1-2   | AES-128-GCM | SHA-256  | Ed25519   | X25519            |
//! | 3     | AES-256-GCM | SHA-384  | Ed25519   | X25519            |
//! | 4-5   | AES-256-GCM | SHA3-512 | Ed25519ph | X25519+ML-KEM-768 |

use core::fmt;

use crate::error::TierError;

// ---------------------------------------------------------------------------
// Security level
// ---------------------------------------------------------------------------

/// A validated security level in `1..=5`.
///
/// Construction is the only place level bounds are checked; once a
/// `SecurityLevel` exists, the suite accessors are infallible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecurityLevel(u8);

impl SecurityLevel {
    /// Lowest defined level.
    pub const MIN: SecurityLevel = SecurityLevel(1);
    /// Highest defined level.
    pub const MAX: SecurityLevel = SecurityLevel(5);

    /// Validate a raw level. Anything outside `1..=5` is rejected.
    pub fn new(level: u8) -> Result<Self, TierError> {
        if (1..=5).contains(&level) {
            Ok(Self(level))
        } else {
            Err(TierError)
        }
    }

    /// The raw numeric level.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// AEAD suite for this level.
    pub fn aead(&self) -> AeadSuite {
        match self.0 {
            1 | 2 => AeadSuite::Aes128Gcm,
            _ => AeadSuite::Aes256Gcm,
        }
    }

    /// Digest suite for this level.
    pub fn digest(&self) -> DigestSuite {
        match self.0 {
            1 | 2 => DigestSuite::Sha256,
            3 => DigestSuite::Sha384,
            _ => DigestSuite::Sha3_512,
        }
    }

    /// Signature suite for this level.
    pub fn signature(&self) -> SignatureSuite {
        match self.0 {
            1..=3 => SignatureSuite::Ed25519,
            _ => SignatureSuite::Ed25519ph,
        }
    }

    /// Key-exchange suite for this level.
    pub fn exchange(&self) -> ExchangeSuite {
        match self.0 {
            1..=3 => ExchangeSuite::X25519,
            _ => ExchangeSuite::HybridX25519MlKem768,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

/// Authenticated encryption suites. Variants are ordered weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AeadSuite {
    Aes128Gcm,
    Aes256Gcm,
}

impl AeadSuite {
    /// Stable identifier used in payload headers and key records.
    pub fn id(&self) -> &'static str {
        match self {
            AeadSuite::Aes128Gcm => "aes-128-gcm",
            AeadSuite::Aes256Gcm => "aes-256-gcm",
        }
    }

    /// Parse a stable identifier back into a suite.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "aes-128-gcm" => Some(AeadSuite::Aes128Gcm),
            "aes-256-gcm" => Some(AeadSuite::Aes256Gcm),
            _ => None,
        }
    }

    /// Key length in bytes.
    pub fn key_bytes(&self) -> usize {
        match self {
            AeadSuite::Aes128Gcm => 16,
            AeadSuite::Aes256Gcm => 32,
        }
    }

    /// Nominal classical strength in bits.
    pub fn strength_bits(&self) -> u16 {
        match self {
            AeadSuite::Aes128Gcm => 128,
            AeadSuite::Aes256Gcm => 256,
        }
    }
}

impl fmt::Display for AeadSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Digest suites. Variants are ordered weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestSuite {
    Sha256,
    Sha384,
    Sha3_512,
}

impl DigestSuite {
    pub fn id(&self) -> &'static str {
        match self {
            DigestSuite::Sha256 => "sha-256",
            DigestSuite::Sha384 => "sha-384",
            DigestSuite::Sha3_512 => "sha3-512",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "sha-256" => Some(DigestSuite::Sha256),
            "sha-384" => Some(DigestSuite::Sha384),
            "sha3-512" => Some(DigestSuite::Sha3_512),
            _ => None,
        }
    }

    /// Digest output length in bytes.
    pub fn output_bytes(&self) -> usize {
        match self {
            DigestSuite::Sha256 => 32,
            DigestSuite::Sha384 => 48,
            DigestSuite::Sha3_512 => 64,
        }
    }

    /// Nominal collision resistance in bits.
    pub fn strength_bits(&self) -> u16 {
        match self {
            DigestSuite::Sha256 => 128,
            DigestSuite::Sha384 => 192,
            DigestSuite::Sha3_512 => 256,
        }
    }
}

impl fmt::Display for DigestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Signature suites. `Ed25519ph` adds domain-separated prehashing on
/// top of the same curve, so its rank is higher at equal bit strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureSuite {
    Ed25519,
    Ed25519ph,
}

impl SignatureSuite {
    pub fn id(&self) -> &'static str {
        match self {
            SignatureSuite::Ed25519 => "ed25519",
            SignatureSuite::Ed25519ph => "ed25519ph",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "ed25519" => Some(SignatureSuite::Ed25519),
            "ed25519ph" => Some(SignatureSuite::Ed25519ph),
            _ => None,
        }
    }

    pub fn strength_bits(&self) -> u16 {
        128
    }
}

impl fmt::Display for SignatureSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Key-exchange suites. The hybrid variant pairs X25519 with ML-KEM-768
/// so a break of either component leaves the other intact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExchangeSuite {
    X25519,
    HybridX25519MlKem768,
}

impl ExchangeSuite {
    pub fn id(&self) -> &'static str {
        match self {
            ExchangeSuite::X25519 => "x25519",
            ExchangeSuite::HybridX25519MlKem768 => "x25519-mlkem768",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "x25519" => Some(ExchangeSuite::X25519),
            "x25519-mlkem768" => Some(ExchangeSuite::HybridX25519MlKem768),
            _ => None,
        }
    }

    pub fn strength_bits(&self) -> u16 {
        match self {
            ExchangeSuite::X25519 => 128,
            ExchangeSuite::HybridX25519MlKem768 => 192,
        }
    }
}

impl fmt::Display for ExchangeSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
