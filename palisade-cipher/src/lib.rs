//! # Palisade Cipher
//!
//! Tiered cryptographic primitives for the Palisade defense core: every
//! operation names a security level from 1 to 5, and this crate maps the
//! level to concrete suites and executes them.
//!
//! ## Quick Start
//!
//! ```rust
//! use palisade_cipher::aead;
//! use palisade_cipher::tier::SecurityLevel;
//!
//! let level = SecurityLevel::new(3).unwrap();
//! let suite = level.aead();
//!
//! let key = vec![0x42u8; suite.key_bytes()];
//! let nonce = aead::nonce().unwrap();
//! let aad = aead::binding_aad("key-1", suite.id(), level.value());
//!
//! let sealed = aead::seal(suite, &key, &nonce, b"hello world", &aad).unwrap();
//! let opened = aead::open(suite, &key, &nonce, &sealed, &aad).unwrap();
//! assert_eq!(opened, b"hello world");
//! ```
//!
//! ## Security Properties
//!
//! - **Monotone tiers**: raising the level never weakens any suite.
//! - **Uniform failure**: every open/verify failure is indistinguishable
//!   from every other; no padding/tag/format oracles.
//! - **Seeded generation**: key material is drawn from a combined
//!   entropy pool (OS CSPRNG, timing jitter, environment digest) through
//!   domain-separated HKDF.
//! - **Hybrid exchange at the top tiers**: X25519 paired with ML-KEM-768
//!   (FIPS 203), so a break of either leaves the other intact.
//!
//! ## What's NOT Provided
//!
//! - Key storage, rotation, or lifecycle (see `palisade-defense`)
//! - Transport or session protocols
//! - Nonce-reuse protection beyond fresh random nonces per seal

#![deny(unsafe_code)]

pub mod aead;
pub mod entropy;
pub mod error;
pub mod exchange;
pub mod hash;
pub mod sign;
pub mod tier;

pub use error::{EntropyError, OpenError, SealError, SignError, TierError};
pub use tier::{AeadSuite, DigestSuite, ExchangeSuite, SecurityLevel, SignatureSuite};
