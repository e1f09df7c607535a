//! ECDSA P-256 and P-384 signature operations.
//!
//! Owner keys may be either curve; device (on-die) keys are always P-384.

use p384::ecdsa::signature::{Signer, Verifier};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::signer::{KeySigner, KeyVerifier};
use crate::types::{KeyAlgorithm, PublicKey};

/// ECDSA P-256 signer.
#[cfg(feature = "ecdsa-p256")]
pub struct P256Signer {
    signing_key: p256::ecdsa::SigningKey,
}

#[cfg(feature = "ecdsa-p256")]
impl P256Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: p256::ecdsa::SigningKey::random(&mut OsRng),
        }
    }

    /// Create a signer from an existing scalar.
    ///
    /// # Errors
    ///
    /// Returns error if the key bytes are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = p256::ecdsa::SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }
}

#[cfg(feature = "ecdsa-p256")]
impl KeySigner for P256Signer {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP256
    }

    fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false);
        Ok(PublicKey::new(
            KeyAlgorithm::EcdsaP256,
            encoded.as_bytes().to_vec(),
        ))
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: p256::ecdsa::Signature = self.signing_key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }
}

/// ECDSA P-256 verifier.
#[cfg(feature = "ecdsa-p256")]
#[derive(Debug, Default)]
pub struct P256Verifier;

#[cfg(feature = "ecdsa-p256")]
impl P256Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "ecdsa-p256")]
impl KeyVerifier for P256Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

        let sig = p256::ecdsa::Signature::from_slice(signature)
            .map_err(|e| CryptoError::invalid_signature(e.to_string()))?;

        Ok(vk.verify(data, &sig).is_ok())
    }
}

/// ECDSA P-384 signer.
pub struct P384Signer {
    signing_key: p384::ecdsa::SigningKey,
}

impl P384Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: p384::ecdsa::SigningKey::random(&mut OsRng),
        }
    }

    /// Create a signer from an existing scalar.
    ///
    /// # Errors
    ///
    /// Returns error if the key bytes are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = p384::ecdsa::SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }

    /// Create a signer from a PKCS#8 DER private key.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not a P-384 PKCS#8 key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        use p384::pkcs8::DecodePrivateKey;

        let signing_key = p384::ecdsa::SigningKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }
}

impl KeySigner for P384Signer {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP384
    }

    fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false);
        Ok(PublicKey::new(
            KeyAlgorithm::EcdsaP384,
            encoded.as_bytes().to_vec(),
        ))
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: p384::ecdsa::Signature = self.signing_key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }
}

/// ECDSA P-384 verifier over SHA-384.
#[derive(Debug, Default)]
pub struct P384Verifier;

impl P384Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl KeyVerifier for P384Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

        let sig = p384::ecdsa::Signature::from_slice(signature)
            .map_err(|e| CryptoError::invalid_signature(e.to_string()))?;

        Ok(vk.verify(data, &sig).is_ok())
    }
}
