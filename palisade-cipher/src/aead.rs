//! Authenticated encryption across the tier suites.
//!
//! Both suites use 96-bit random nonces and 128-bit tags. `open` returns
//! a uniform [`OpenError`] for every failure mode.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use getrandom::getrandom;

use crate::error::{OpenError, SealError};
use crate::tier::AeadSuite;

/// Nonce length in bytes (96 bits, the GCM standard size).
pub const NONCE_BYTES: usize = 12;
/// Authentication tag length in bytes.
pub const TAG_BYTES: usize = 16;

/// Generate a fresh random nonce. Used on the encryption path only.
pub fn nonce() -> Result<[u8; NONCE_BYTES], SealError> {
    let mut n = [0u8; NONCE_BYTES];
    getrandom(&mut n).map_err(|_| SealError)?;
    Ok(n)
}

/// Canonical associated data binding a payload to its key and tier.
///
/// Format: `key|{key_id}|alg|{algorithm}|lvl|{level}`. Any relabeling of
/// these header fields makes the tag check fail.
pub fn binding_aad(key_id: &str, algorithm: &str, level: u8) -> Vec<u8> {
    format!("key|{}|alg|{}|lvl|{}", key_id, algorithm, level).into_bytes()
}

/// AEAD-seal `plaintext`. The key length must match the suite.
///
/// Returns ciphertext with the 16-byte tag appended.
pub fn seal(
    suite: AeadSuite,
    key: &[u8],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SealError> {
    let n = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    match suite {
        AeadSuite::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| SealError)?;
            cipher.encrypt(n, payload).map_err(|_| SealError)
        }
        AeadSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SealError)?;
            cipher.encrypt(n, payload).map_err(|_| SealError)
        }
    }
}

/// AEAD-open `ciphertext` (tag appended). Verifies the tag over
/// ciphertext and AAD before returning any plaintext.
pub fn open(
    suite: AeadSuite,
    key: &[u8],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, OpenError> {
    let n = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    match suite {
        AeadSuite::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| OpenError)?;
            cipher.decrypt(n, payload).map_err(|_| OpenError)
        }
        AeadSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| OpenError)?;
            cipher.decrypt(n, payload).map_err(|_| OpenError)
        }
    }
}
