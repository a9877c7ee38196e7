//! Signatures across the tier suites.
//!
//! `Ed25519` signs the message directly. `Ed25519ph` signs a SHA-512
//! prehash under a fixed domain-separation context, which keeps signing
//! cost flat for large inputs and prevents cross-protocol reuse of
//! signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};

use crate::error::SignError;
use crate::tier::SignatureSuite;

/// Signing seed length in bytes.
pub const SEED_BYTES: usize = 32;
/// Public verification key length in bytes.
pub const PUBLIC_KEY_BYTES: usize = 32;
/// Signature length in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// Domain-separation context for the prehashed variant.
const PH_CONTEXT: &[u8] = b"palisade-sig-v1";

/// Derive the public verification key for a signing seed.
pub fn public_key(seed: &[u8; SEED_BYTES]) -> [u8; PUBLIC_KEY_BYTES] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}

/// Sign `data` under the suite's scheme.
///
/// `seed` must be exactly [`SEED_BYTES`] long.
pub fn sign(
    suite: SignatureSuite,
    seed: &[u8],
    data: &[u8],
) -> Result<[u8; SIGNATURE_BYTES], SignError> {
    let seed: &[u8; SEED_BYTES] = seed.try_into().map_err(|_| SignError)?;
    let sk = SigningKey::from_bytes(seed);
    let sig = match suite {
        SignatureSuite::Ed25519 => sk.sign(data),
        SignatureSuite::Ed25519ph => {
            let mut ph = Sha512::new();
            ph.update(data);
            sk.sign_prehashed(ph, Some(PH_CONTEXT)).map_err(|_| SignError)?
        }
    };
    Ok(sig.to_bytes())
}

/// Verify a signature. Every failure mode returns `false`; this function
/// never errors and never panics on malformed inputs.
pub fn verify(suite: SignatureSuite, public: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let public: &[u8; PUBLIC_KEY_BYTES] = match public.try_into() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let vk = match VerifyingKey::from_bytes(public) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    match suite {
        SignatureSuite::Ed25519 => vk.verify(data, &sig).is_ok(),
        SignatureSuite::Ed25519ph => {
            let mut ph = Sha512::new();
            ph.update(data);
            vk.verify_prehashed(ph, Some(PH_CONTEXT), &sig).is_ok()
        }
    }
}
