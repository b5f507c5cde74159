//! Signed distribution packages.
//!
//! A package is a ZIP archive with two entries: `export.bin` (the JSON
//! payload) and `export.sig` (signature over `export.bin`). Payloads are only
//! decoded after the signature has been checked against the configured trust
//! anchors.

use std::io::{Cursor, Read, Write};

use dcc_crypto::{CryptoError, P256Verifier, PackageSigner, SignatureVerifier};
use tracing::{debug, warn};

/// Archive entry holding the payload.
pub const PAYLOAD_ENTRY: &str = "export.bin";

/// Archive entry holding the signature.
pub const SIGNATURE_ENTRY: &str = "export.sig";

/// Payload and detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPackage {
    /// Signed payload bytes.
    pub bin: Vec<u8>,
    /// Signature over `bin`.
    pub signature: Vec<u8>,
}

impl SignedPackage {
    /// Sign a payload.
    pub fn sign(bin: Vec<u8>, signer: &dyn PackageSigner) -> Result<Self, CryptoError> {
        let signature = signer.sign(&bin)?;
        Ok(Self { bin, signature })
    }

    /// Read a package from a ZIP archive.
    ///
    /// Returns `None` for an empty body, an unreadable archive or a missing
    /// payload entry. A missing signature entry yields an empty signature,
    /// which never verifies.
    #[must_use]
    pub fn from_zip(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(archive) => archive,
            Err(e) => {
                warn!("Package: unreadable archive: {}", e);
                return None;
            },
        };

        let bin = read_entry(&mut archive, PAYLOAD_ENTRY)?;
        let signature = read_entry(&mut archive, SIGNATURE_ENTRY).unwrap_or_default();
        debug!(
            payload_bytes = bin.len(),
            signature_bytes = signature.len(),
            "Package: archive read"
        );
        Some(Self { bin, signature })
    }

    /// Write the package as a ZIP archive.
    pub fn to_zip(&self) -> Result<Vec<u8>, zip::result::ZipError> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        writer.start_file(PAYLOAD_ENTRY, options)?;
        writer.write_all(&self.bin)?;
        writer.start_file(SIGNATURE_ENTRY, options)?;
        writer.write_all(&self.signature)?;

        Ok(writer.finish()?.into_inner())
    }
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(e) => {
            debug!(entry = %name, "Package: entry not present ({})", e);
            return None;
        },
    };
    let mut contents = Vec::new();
    match entry.read_to_end(&mut contents) {
        Ok(_) => Some(contents),
        Err(e) => {
            warn!(entry = %name, "Package: failed to read entry: {}", e);
            None
        },
    }
}

/// Decides whether a package is authentic.
pub trait SignatureVerification: Send + Sync {
    /// Whether the signature over the payload is valid.
    fn verify(&self, package: &SignedPackage) -> bool;
}

/// Accepts packages signed by any of a set of P-256 trust anchors.
pub struct TrustAnchorVerifier {
    anchors: Vec<Vec<u8>>,
    verifier: P256Verifier,
}

impl TrustAnchorVerifier {
    /// Create a verifier from SEC1-encoded public keys.
    #[must_use]
    pub fn new(anchors: Vec<Vec<u8>>) -> Self {
        Self {
            anchors,
            verifier: P256Verifier::new(),
        }
    }

    /// Create a verifier from hex-encoded SEC1 public keys.
    pub fn from_hex<S: AsRef<str>>(anchors: &[S]) -> Result<Self, hex::FromHexError> {
        let decoded = anchors
            .iter()
            .map(|a| hex::decode(a.as_ref().trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(decoded))
    }

    /// Number of configured anchors.
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}

impl SignatureVerification for TrustAnchorVerifier {
    fn verify(&self, package: &SignedPackage) -> bool {
        if self.anchors.is_empty() {
            warn!("Package: no trust anchors configured, rejecting signature");
            return false;
        }
        self.anchors.iter().enumerate().any(|(index, anchor)| {
            match self
                .verifier
                .verify(anchor, &package.bin, &package.signature)
            {
                Ok(valid) => valid,
                Err(e) => {
                    debug!(anchor = index, "Package: anchor rejected signature: {}", e);
                    false
                },
            }
        })
    }
}
