//! Error types.
//!
//! Decrypt-path failures are deliberately uniform: [`OpenError`] carries
//! no cause, so callers cannot distinguish a bad tag from a malformed
//! input or a wrong key. Everything distinguishable stays on the encrypt
//! and parameter-validation paths where no secret is at stake.

use core::fmt;

/// Failure while sealing (encrypting). Not secret-dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealError;

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seal failed")
    }
}

impl std::error::Error for SealError {}

/// Failure while opening (decrypting or authenticating). Uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenError;

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "open failed")
    }
}

impl std::error::Error for OpenError {}

// Normalize seal-side errors into open errors (oracle discipline).
impl From<SealError> for OpenError {
    fn from(_: SealError) -> Self {
        OpenError
    }
}

/// Failure while producing a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignError;

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signing failed")
    }
}

impl std::error::Error for SignError {}

/// Invalid tier parameter: a level outside `1..=5` or an unknown suite
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierError;

impl fmt::Display for TierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tier")
    }
}

impl std::error::Error for TierError {}

/// The operating-system entropy source failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntropyError;

impl fmt::Display for EntropyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entropy source failure")
    }
}

impl std::error::Error for EntropyError {}
