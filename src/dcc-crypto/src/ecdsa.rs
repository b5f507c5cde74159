//! ECDSA P-256 signature operations.
//!
//! Distribution packages are signed with ECDSA P-256 over SHA-256. Signatures
//! arrive either DER-encoded (as emitted by most HSM tooling) or in the fixed
//! 64-byte `r || s` form; the verifier accepts both.

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::signer::{PackageSigner, SignatureAlgorithm, SignatureVerifier};

/// Length of a fixed-size `r || s` P-256 signature.
const FIXED_SIGNATURE_LEN: usize = 64;

/// ECDSA P-256 signer.
pub struct P256Signer {
    signing_key: SigningKey,
}

impl P256Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a signer from a 32-byte scalar.
    ///
    /// # Errors
    ///
    /// Returns error if the key bytes are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }

    /// Get the verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign data and return an ASN.1 DER encoded signature.
    pub fn sign_der(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| CryptoError::signing_failed(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

impl PackageSigner for P256Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256Sha256
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false);
        Ok(encoded.as_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| CryptoError::signing_failed(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// ECDSA P-256 verifier.
pub struct P256Verifier;

impl P256Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn parse_signature(signature: &[u8]) -> Result<Signature, CryptoError> {
        if signature.len() == FIXED_SIGNATURE_LEN {
            Signature::from_slice(signature)
        } else {
            Signature::from_der(signature)
        }
        .map_err(|e| CryptoError::invalid_signature(e.to_string()))
    }
}

impl Default for P256Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for P256Verifier {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256Sha256
    }

    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let vk = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

        let sig = Self::parse_signature(signature)?;

        Ok(vk.verify(data, &sig).is_ok())
    }
}
