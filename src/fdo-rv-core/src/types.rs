//! Registration payload types.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use fdo_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use uuid::Uuid;

use crate::error::RvError;
use crate::session::Nonce3;
use crate::voucher::OwnershipVoucher;

/// Transport a device uses to reach its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RvProtocol {
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    Tls,
    /// HTTP.
    Http,
    /// HTTPS.
    Https,
}

/// One way to reach the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousAddress {
    /// DNS name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    /// IP address, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    /// Port.
    pub port: u16,
    /// Transport.
    pub protocol: RvProtocol,
}

/// Unsigned description of where a device finds its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectBlob {
    /// Candidate addresses, tried in order.
    pub addresses: Vec<RendezvousAddress>,
}

/// Registration request body: the voucher, the wait the owner asks for, and
/// the server's Nonce3 echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct To0d {
    /// Voucher being registered.
    pub voucher: OwnershipVoucher,
    /// Requested lease in seconds.
    pub wait_seconds: u32,
    /// Nonce3 from the server's HelloAck.
    pub nonce3: Nonce3,
}

impl To0d {
    /// Canonical encoding; the owner signature commits to its hash.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RvError> {
        serde_json::to_vec(self).map_err(|e| RvError::invalid_message(format!("To0d: {e}")))
    }

    /// Parse the canonical encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RvError> {
        serde_json::from_slice(bytes).map_err(|e| RvError::invalid_message(format!("To0d: {e}")))
    }
}

/// The part of a registration the owner signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct To1dPayload {
    /// Where the device should go.
    pub blob: RedirectBlob,
    /// SHA-384 of the encoded [`To0d`], binding the signature to one
    /// voucher, wait and nonce.
    pub to0d_hash: Vec<u8>,
}

/// SHA-384 digest of encoded `To0d` bytes.
pub fn to0d_hash(to0d_bytes: &[u8]) -> Vec<u8> {
    Sha384::digest(to0d_bytes).to_vec()
}

/// An owner-signed redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRedirect {
    /// Encoded [`To1dPayload`].
    pub payload: Vec<u8>,
    /// Owner signature over `payload`.
    pub signature: Vec<u8>,
}

impl SignedRedirect {
    /// Decode the signed payload.
    pub fn decode_payload(&self) -> Result<To1dPayload, RvError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| RvError::invalid_message(format!("To1d payload: {e}")))
    }

    /// Check the signature with the owner's public key.
    pub fn verify(&self, owner_key: &PublicKey) -> Result<bool, RvError> {
        Ok(owner_key.verify(&self.payload, &self.signature)?)
    }

    /// Encoding persisted by the server.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RvError> {
        serde_json::to_vec(self).map_err(|e| RvError::invalid_message(format!("To1d: {e}")))
    }

    /// Parse the persisted encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RvError> {
        serde_json::from_slice(bytes).map_err(|e| RvError::invalid_message(format!("To1d: {e}")))
    }
}

/// Requested and granted registration wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// What the owner asked for, in seconds.
    pub requested_wait: u32,
    /// What the server granted, in seconds.
    pub granted_wait: u32,
}

/// A persisted registration, keyed by voucher GUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRecord {
    /// Device GUID.
    pub guid: Uuid,
    /// Encoded [`SignedRedirect`], stored as received.
    pub signed_blob: Vec<u8>,
    /// Fingerprint of the owner key that signed it.
    pub owner_fingerprint: String,
    /// SEC1 encoding of the device public key, if the voucher has one.
    pub device_key: Option<Vec<u8>>,
    /// Requested wait in seconds.
    pub requested_wait: u32,
    /// When the registration was accepted.
    pub created_at: DateTime<Utc>,
    /// `created_at` plus the requested wait.
    pub expires_at: DateTime<Utc>,
}

impl RedirectRecord {
    /// Build a record created at `created_at`.
    pub fn new(
        guid: Uuid,
        signed_blob: Vec<u8>,
        owner_fingerprint: String,
        device_key: Option<Vec<u8>>,
        requested_wait: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            guid,
            signed_blob,
            owner_fingerprint,
            device_key,
            requested_wait,
            created_at,
            expires_at: created_at + Duration::seconds(i64::from(requested_wait)),
        }
    }

    /// Whether the record has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
