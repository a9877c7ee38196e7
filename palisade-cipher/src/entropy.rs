//! Combined entropy pool for key generation.
//!
//! Three sources feed a fixed-layout pool:
//!
//! - 256 bytes from the OS CSPRNG
//! - 8 timing-jitter digests (32 bytes each): sleep briefly, hash the
//!   measured wall-clock delta
//! - one 32-byte digest over host identity, process id, memory usage,
//!   and the current time
//!
//! Key material is never cut from the pool directly; it is drawn through
//! HKDF-SHA256 with a domain-separated info string, so distinct purposes
//! derived from one pool stay independent.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use getrandom::getrandom;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EntropyError;

/// Bytes drawn from the OS CSPRNG.
pub const OS_BYTES: usize = 256;
/// Number of timing-jitter samples.
pub const JITTER_SAMPLES: usize = 8;
/// Length of each digest contribution.
pub const DIGEST_BYTES: usize = 32;
/// Total pool length. 256 + 8*32 + 32 = 544.
pub const POOL_BYTES: usize = OS_BYTES + JITTER_SAMPLES * DIGEST_BYTES + DIGEST_BYTES;

/// Sleep per jitter sample. Scheduler noise around this interval is the
/// signal being harvested.
const JITTER_SLEEP: Duration = Duration::from_millis(1);

/// HKDF info prefix for pool-derived key material.
const DERIVE_PREFIX: &[u8] = b"palisade-key-v1";

/// A gathered entropy pool and its quality score. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EntropyPool {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    quality: f64,
}

impl EntropyPool {
    /// Gather a fresh pool from all three sources.
    ///
    /// Blocks for roughly `JITTER_SAMPLES` milliseconds of sleep time.
    /// Fails only if the OS CSPRNG is unavailable.
    pub fn gather() -> Result<Self, EntropyError> {
        let mut bytes = Vec::with_capacity(POOL_BYTES);

        let mut os = [0u8; OS_BYTES];
        getrandom(&mut os).map_err(|_| EntropyError)?;
        bytes.extend_from_slice(&os);
        os.zeroize();

        for _ in 0..JITTER_SAMPLES {
            bytes.extend_from_slice(&jitter_sample());
        }
        bytes.extend_from_slice(&environment_sample());

        let quality = quality_score(&bytes);
        Ok(Self { bytes, quality })
    }

    /// Byte-distribution quality score of this pool, in `0.0..=1.0`.
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Pool length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Derive `len` bytes of key material, domain-separated by `info`.
    pub fn derive(&self, info: &[u8], len: usize) -> Result<Vec<u8>, EntropyError> {
        let hk = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut full_info = Vec::with_capacity(DERIVE_PREFIX.len() + 1 + info.len());
        full_info.extend_from_slice(DERIVE_PREFIX);
        full_info.push(b'|');
        full_info.extend_from_slice(info);

        let mut out = vec![0u8; len];
        hk.expand(&full_info, &mut out).map_err(|_| EntropyError)?;
        Ok(out)
    }

    /// Derive a fixed 32-byte seed, domain-separated by `info`.
    pub fn derive_seed(&self, info: &[u8]) -> Result<[u8; 32], EntropyError> {
        let bytes = self.derive(info, 32)?;
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        Ok(seed)
    }
}

/// One jitter sample: the hash of how long a nominal 1ms sleep took.
fn jitter_sample() -> [u8; DIGEST_BYTES] {
    let start = Instant::now();
    std::thread::sleep(JITTER_SLEEP);
    let delta = start.elapsed();

    let mut h = Sha256::new();
    h.update(delta.as_nanos().to_be_bytes());
    h.finalize().into()
}

/// Digest over host identity, process id, memory usage, and wall clock.
/// Every component is best-effort; a missing source contributes nothing.
fn environment_sample() -> [u8; DIGEST_BYTES] {
    let mut h = Sha256::new();
    if let Ok(name) = hostname::get() {
        h.update(name.to_string_lossy().as_bytes());
    }
    h.update(std::process::id().to_be_bytes());
    if let Ok(statm) = std::fs::read("/proc/self/statm") {
        h.update(&statm);
    }
    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        h.update(now.as_nanos().to_be_bytes());
    }
    h.finalize().into()
}

/// Score a byte pool by the spread of its 256-bucket frequency counts.
///
/// A perfectly flat distribution scores 1.0; a pool of one repeated byte
/// scores 0.0. This is a sanity signal for catastrophic source failure,
/// not an entropy estimate.
pub fn quality_score(pool: &[u8]) -> f64 {
    if pool.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in pool {
        counts[b as usize] += 1;
    }
    let n = pool.len() as f64;
    let mean = n / 256.0;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / 256.0;
    let sigma = variance.sqrt();

    // Worst case: one bucket holds everything, the other 255 are empty.
    let worst_variance = ((n - mean) * (n - mean) + 255.0 * mean * mean) / 256.0;
    let sigma_max = worst_variance.sqrt();
    if sigma_max == 0.0 {
        return 1.0;
    }
    (1.0 - sigma / sigma_max).clamp(0.0, 1.0)
}
