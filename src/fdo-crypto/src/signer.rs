//! Signer and verifier traits.
//!
//! Owner keys sign redirect blobs on the client side; the rendezvous
//! server verifies them against the public key carried in the voucher.

use crate::error::CryptoError;
use crate::types::{KeyAlgorithm, PublicKey};

/// Trait for signing with a private key.
pub trait KeySigner: Send + Sync {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Get the public key.
    fn public_key(&self) -> Result<PublicKey, CryptoError>;

    /// Sign data and return a fixed-size (r || s) signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Trait for signature verification against an encoded public key.
pub trait KeyVerifier {
    /// Verify a signature against a public key.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;
}
