//! Digest dispatch across the tier suites.

use sha2::{Digest, Sha256, Sha384};
use sha3::Sha3_512;

use crate::tier::DigestSuite;

/// Compute the digest of `data` under the given suite.
///
/// Output length follows [`DigestSuite::output_bytes`].
pub fn digest(suite: DigestSuite, data: &[u8]) -> Vec<u8> {
    match suite {
        DigestSuite::Sha256 => Sha256::digest(data).to_vec(),
        DigestSuite::Sha384 => Sha384::digest(data).to_vec(),
        DigestSuite::Sha3_512 => Sha3_512::digest(data).to_vec(),
    }
}
