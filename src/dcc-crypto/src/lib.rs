//! # dcc-crypto
//!
//! Signature verification for signed rule and value-set packages.
//!
//! Every package delivered by the certificate distribution service is a pair
//! of `export.bin` (payload) and `export.sig` (signature over the payload).
//! The signature is ECDSA over NIST P-256 with SHA-256, encoded either as
//! ASN.1 DER or as the fixed 64-byte `r || s` form:
//!
//! ```text
//! signature = Sign_ECDSA-P256-SHA256(trust_anchor_key, export.bin)
//! ```
//!
//! Verification is exposed through the [`SignatureVerifier`] trait so the
//! validation engine only consumes the capability and never depends on a
//! concrete curve implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod signer;

#[cfg(feature = "ecdsa-p256")]
mod ecdsa;

pub use error::CryptoError;
pub use signer::{PackageSigner, SignatureAlgorithm, SignatureVerifier};

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};
