//! # fdo-crypto
//!
//! Signature primitives for FDO rendezvous registration.
//!
//! - **Owner keys**: ECDSA P-256 or P-384, used to sign and verify the
//!   redirect blob a device's owner registers with the rendezvous service.
//! - **On-die device keys**: ECDSA P-384 signatures in the vendor raw
//!   layout, converted to DER and verified over `task-info || data`.
//!
//! ## On-die Verification
//!
//! ```rust,ignore
//! use fdo_crypto::ondie;
//!
//! // Total: malformed input is `false`, never an error.
//! let ok = ondie::verify(b"serial", &raw_signature, &device_key_sec1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod ecdsa;
mod error;
pub mod ondie;
mod signer;
mod types;

pub use error::CryptoError;
pub use signer::{KeySigner, KeyVerifier};
pub use types::{KeyAlgorithm, PublicKey};

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};

pub use ecdsa::{P384Signer, P384Verifier};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// Used for nonce and digest comparisons during registration.
/// The length check still returns early; lengths here are not secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
