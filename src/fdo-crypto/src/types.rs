//! Key types shared by the owner and device signature paths.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::signer::KeyVerifier;

/// Signature algorithm of an owner or device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyAlgorithm {
    /// ECDSA with NIST P-256 (secp256r1) and SHA-256.
    EcdsaP256 = 1,

    /// ECDSA with NIST P-384 (secp384r1) and SHA-384.
    /// On-die device keys always use this curve.
    EcdsaP384 = 3,
}

impl KeyAlgorithm {
    /// OID for the signature algorithm (for X.509/PKCS).
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "1.2.840.10045.4.3.2", // ecdsa-with-SHA256
            Self::EcdsaP384 => "1.2.840.10045.4.3.3", // ecdsa-with-SHA384
        }
    }

    /// Length of an uncompressed SEC1 point for this curve.
    #[must_use]
    pub const fn sec1_uncompressed_len(&self) -> usize {
        match self {
            Self::EcdsaP256 => 65,
            Self::EcdsaP384 => 97,
        }
    }
}

/// A public key tagged with its algorithm.
///
/// `encoded` holds the uncompressed SEC1 point. The fingerprint used by the
/// key allow/deny policy is computed over exactly these bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// Algorithm the key verifies.
    pub algorithm: KeyAlgorithm,
    /// Uncompressed SEC1 encoding.
    pub encoded: Vec<u8>,
}

impl PublicKey {
    /// Wrap an encoded key.
    #[must_use]
    pub fn new(algorithm: KeyAlgorithm, encoded: Vec<u8>) -> Self {
        Self { algorithm, encoded }
    }

    /// Uppercase hex SHA-256 digest of the key encoding.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode_upper(Sha256::digest(&self.encoded))
    }

    /// Verify a fixed-size (r || s) signature made by this key.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not verify.
    ///
    /// # Errors
    ///
    /// Returns error if the key or signature cannot be parsed, or the
    /// algorithm is not compiled in.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        match self.algorithm {
            #[cfg(feature = "ecdsa-p256")]
            KeyAlgorithm::EcdsaP256 => {
                crate::ecdsa::P256Verifier::new().verify(&self.encoded, data, signature)
            },
            #[cfg(not(feature = "ecdsa-p256"))]
            KeyAlgorithm::EcdsaP256 => Err(CryptoError::UnsupportedAlgorithm {
                algorithm: KeyAlgorithm::EcdsaP256,
            }),
            KeyAlgorithm::EcdsaP384 => {
                crate::ecdsa::P384Verifier::new().verify(&self.encoded, data, signature)
            },
        }
    }
}
