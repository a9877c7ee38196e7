//! Key-exchange keypair generation across the tier suites.
//!
//! Key material is carried as fixed-layout byte bundles so records can
//! serialize it without caring which suite produced it:
//!
//! - `x25519`: secret `sk[32]`, public `pk[32]`
//! - `x25519-mlkem768`: secret `x25519_sk[32] || mlkem_dk[2400]`,
//!   public `x25519_pk[32] || mlkem_ek[1184]`

use ml_kem::{EncodedSizeUser, KemCore, MlKem768};
use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::tier::ExchangeSuite;

/// X25519 secret and public key length.
pub const X25519_BYTES: usize = 32;
/// ML-KEM-768 decapsulation key length.
pub const MLKEM_DK_BYTES: usize = 2400;
/// ML-KEM-768 encapsulation key length.
pub const MLKEM_EK_BYTES: usize = 1184;

/// Hybrid secret bundle length. 32 + 2400 = 2432.
pub const HYBRID_SECRET_BYTES: usize = X25519_BYTES + MLKEM_DK_BYTES;
/// Hybrid public bundle length. 32 + 1184 = 1216.
pub const HYBRID_PUBLIC_BYTES: usize = X25519_BYTES + MLKEM_EK_BYTES;

/// A freshly generated exchange keypair. The secret half is zeroized on
/// drop; copy it out before the value goes away.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ExchangeKeypair {
    #[zeroize(skip)]
    public: Vec<u8>,
    secret: Vec<u8>,
}

impl ExchangeKeypair {
    /// Public bundle bytes.
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Secret bundle bytes.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

/// Generate a keypair for the suite.
///
/// The classical half is derived from `seed` (drawn from the audited
/// entropy pool by the caller). The lattice half draws fresh randomness
/// from the OS CSPRNG, which is itself a pool component.
pub fn generate(suite: ExchangeSuite, seed: &[u8; 32]) -> ExchangeKeypair {
    let x_secret = StaticSecret::from(*seed);
    let x_public = X25519PublicKey::from(&x_secret);

    match suite {
        ExchangeSuite::X25519 => ExchangeKeypair {
            public: x_public.as_bytes().to_vec(),
            secret: x_secret.to_bytes().to_vec(),
        },
        ExchangeSuite::HybridX25519MlKem768 => {
            let (mlkem_dk, mlkem_ek) = MlKem768::generate(&mut OsRng);
            let dk_bytes = mlkem_dk.as_bytes();
            let ek_bytes = mlkem_ek.as_bytes();

            let mut secret = Vec::with_capacity(HYBRID_SECRET_BYTES);
            secret.extend_from_slice(&x_secret.to_bytes());
            secret.extend_from_slice(dk_bytes.as_slice());

            let mut public = Vec::with_capacity(HYBRID_PUBLIC_BYTES);
            public.extend_from_slice(x_public.as_bytes());
            public.extend_from_slice(ek_bytes.as_slice());

            ExchangeKeypair { public, secret }
        }
    }
}

/// Expected secret bundle length for a suite.
pub fn secret_len(suite: ExchangeSuite) -> usize {
    match suite {
        ExchangeSuite::X25519 => X25519_BYTES,
        ExchangeSuite::HybridX25519MlKem768 => HYBRID_SECRET_BYTES,
    }
}

/// Expected public bundle length for a suite.
pub fn public_len(suite: ExchangeSuite) -> usize {
    match suite {
        ExchangeSuite::X25519 => X25519_BYTES,
        ExchangeSuite::HybridX25519MlKem768 => HYBRID_PUBLIC_BYTES,
    }
}
