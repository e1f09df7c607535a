//! Ownership voucher accessors.
//!
//! The registration core never inspects a voucher beyond the identity
//! material below, and never changes it.

use fdo_crypto::{KeyAlgorithm, PublicKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trust::leaf_public_key;

/// Read-only identity extraction from an ownership voucher.
pub trait VoucherAccess {
    /// Device GUID.
    fn guid(&self) -> Uuid;

    /// Current owner's public key.
    fn owner_public_key(&self) -> &PublicKey;

    /// Device attestation key, if the voucher carries one.
    fn device_public_key(&self) -> Option<PublicKey>;

    /// Device certificate chain (DER, leaf first). Empty if absent.
    fn device_cert_chain(&self) -> &[Vec<u8>];
}

/// Minimal voucher carrying what registration needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipVoucher {
    /// Device GUID.
    pub guid: Uuid,
    /// Current owner's public key.
    pub owner_public_key: PublicKey,
    /// Device certificate chain (DER, leaf first).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_cert_chain: Vec<Vec<u8>>,
}

impl OwnershipVoucher {
    /// Voucher without a device certificate chain.
    pub fn new(guid: Uuid, owner_public_key: PublicKey) -> Self {
        Self {
            guid,
            owner_public_key,
            device_cert_chain: Vec::new(),
        }
    }

    /// Attach a device certificate chain.
    pub fn with_device_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.device_cert_chain = chain;
        self
    }
}

impl VoucherAccess for OwnershipVoucher {
    fn guid(&self) -> Uuid {
        self.guid
    }

    fn owner_public_key(&self) -> &PublicKey {
        &self.owner_public_key
    }

    /// The leaf certificate's key; on-die device keys are P-384.
    fn device_public_key(&self) -> Option<PublicKey> {
        let leaf = self.device_cert_chain.first()?;
        leaf_public_key(leaf).map(|encoded| PublicKey::new(KeyAlgorithm::EcdsaP384, encoded))
    }

    fn device_cert_chain(&self) -> &[Vec<u8>] {
        &self.device_cert_chain
    }
}
