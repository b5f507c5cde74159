//! Signing and verification seams.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Signature algorithm used for distribution packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// ECDSA with NIST P-256 (secp256r1) over SHA-256.
    EcdsaP256Sha256 = 1,
}

impl SignatureAlgorithm {
    /// OID for this algorithm (for X.509/PKCS).
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "1.2.840.10045.4.3.2",
        }
    }
}

/// Produces package signatures.
///
/// Only the distribution side (and test fixtures) sign; the engine verifies.
pub trait PackageSigner {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the SEC1-encoded public key.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the signature in fixed `r || s` form.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Verifies package signatures against a public key.
pub trait SignatureVerifier {
    /// Get the algorithm checked by this verifier.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Verify a signature against a public key.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not match and
    /// `Err` when the key or signature cannot be parsed at all.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;
}
