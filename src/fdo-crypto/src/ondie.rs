//! On-die ECDSA signature validation.
//!
//! On-die hardware produces a raw signature laid out as
//!
//! ```text
//! [ task-info (36) | r (48) | s (48) ]
//! ```
//!
//! and signs `task-info || data` rather than `data` alone. Verification
//! rebuilds both halves: the signed message gets the task-info header
//! prepended, and `(r, s)` is re-encoded as a DER `SEQUENCE { INTEGER r,
//! INTEGER s }` before ECDSA P-384 / SHA-384 verification.
//!
//! [`verify`] is total: malformed input of any kind yields `false`.

use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};

use crate::error::CryptoError;

/// Length of the task-info header at the front of an on-die signature.
pub const TASK_INFO_LEN: usize = 36;

/// Length of the R field.
pub const R_LEN: usize = 48;

/// Length of the S field.
pub const S_LEN: usize = 48;

/// Minimum length of a raw on-die signature.
pub const MIN_SIGNATURE_LEN: usize = TASK_INFO_LEN + R_LEN + S_LEN;

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// A raw on-die signature split into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnDieSignature {
    task_info: [u8; TASK_INFO_LEN],
    r: [u8; R_LEN],
    s: [u8; S_LEN],
}

impl OnDieSignature {
    /// Split a raw signature. Bytes past [`MIN_SIGNATURE_LEN`] are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the signature is shorter than [`MIN_SIGNATURE_LEN`].
    pub fn parse(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() < MIN_SIGNATURE_LEN {
            return Err(CryptoError::invalid_signature(format!(
                "on-die signature is {} bytes, need at least {}",
                raw.len(),
                MIN_SIGNATURE_LEN
            )));
        }

        let mut task_info = [0u8; TASK_INFO_LEN];
        let mut r = [0u8; R_LEN];
        let mut s = [0u8; S_LEN];
        task_info.copy_from_slice(&raw[..TASK_INFO_LEN]);
        r.copy_from_slice(&raw[TASK_INFO_LEN..TASK_INFO_LEN + R_LEN]);
        s.copy_from_slice(&raw[TASK_INFO_LEN + R_LEN..MIN_SIGNATURE_LEN]);

        Ok(Self { task_info, r, s })
    }

    /// The task-info header.
    #[must_use]
    pub fn task_info(&self) -> &[u8; TASK_INFO_LEN] {
        &self.task_info
    }

    /// The message the hardware actually signed: `task-info || data`.
    #[must_use]
    pub fn signed_message(&self, data: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(TASK_INFO_LEN + data.len());
        message.extend_from_slice(&self.task_info);
        message.extend_from_slice(data);
        message
    }

    /// DER encoding of `(r, s)`.
    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        encode_der_signature(&self.r, &self.s)
    }

    fn to_fixed(&self) -> Result<Signature, CryptoError> {
        let mut fixed = [0u8; R_LEN + S_LEN];
        fixed[..R_LEN].copy_from_slice(&self.r);
        fixed[R_LEN..].copy_from_slice(&self.s);
        Signature::from_slice(&fixed).map_err(|e| CryptoError::invalid_signature(e.to_string()))
    }
}

// Both padded INTEGERs still fit a short-form SEQUENCE length.
const _: () = assert!(4 + (R_LEN + 1) + (S_LEN + 1) < 0x80);

/// Encode the R and S fields as a DER ECDSA signature.
///
/// Each field whose top bit is set gets a `0x00` prefix so it reads as a
/// non-negative INTEGER. Fields are otherwise emitted as given, without
/// stripping leading zeros.
#[must_use]
pub fn encode_der_signature(r: &[u8; R_LEN], s: &[u8; S_LEN]) -> Vec<u8> {
    let r_len = integer_len(r);
    let s_len = integer_len(s);
    // tag + length for each INTEGER
    let body_len = 4 + r_len + s_len;

    let mut der = Vec::with_capacity(2 + body_len);
    der.push(DER_SEQUENCE);
    der.push(body_len as u8);
    push_integer(&mut der, r);
    push_integer(&mut der, s);
    der
}

fn needs_pad(value: &[u8]) -> bool {
    value.first().is_some_and(|b| b & 0x80 != 0)
}

fn integer_len(value: &[u8]) -> usize {
    value.len() + usize::from(needs_pad(value))
}

fn push_integer(der: &mut Vec<u8>, value: &[u8]) {
    der.push(DER_INTEGER);
    der.push(integer_len(value) as u8);
    if needs_pad(value) {
        der.push(0x00);
    }
    der.extend_from_slice(value);
}

/// Verify a raw on-die signature over `signed_data`.
///
/// `public_key` is the SEC1 encoding of the device's P-384 key. Returns
/// `false` for short signatures, unparseable keys, malformed DER, and
/// signatures that do not verify.
#[must_use]
pub fn verify(signed_data: &[u8], raw_signature: &[u8], public_key: &[u8]) -> bool {
    try_verify(signed_data, raw_signature, public_key).unwrap_or(false)
}

fn try_verify(
    signed_data: &[u8],
    raw_signature: &[u8],
    public_key: &[u8],
) -> Result<bool, CryptoError> {
    let parsed = OnDieSignature::parse(raw_signature)?;

    let vk = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;

    // The DER parser rejects non-minimal INTEGERs, which the fixed-width
    // fields produce whenever R or S has a leading zero byte.
    let signature = match Signature::from_der(&parsed.to_der()) {
        Ok(signature) => signature,
        Err(_) => parsed.to_fixed()?,
    };

    Ok(vk
        .verify(&parsed.signed_message(signed_data), &signature)
        .is_ok())
}
