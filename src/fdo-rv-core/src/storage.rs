//! Persistence collaborators for the server and client roles.
//!
//! Both traits extend [`SessionObserver`], so a backend sees every
//! lifecycle transition of the sessions it stores.

use std::sync::Arc;

use fdo_crypto::{KeySigner, PublicKey};

use crate::error::RvError;
use crate::session::{Nonce3, SessionObserver, SessionToken};
use crate::types::{RedirectBlob, RedirectRecord};
use crate::voucher::OwnershipVoucher;

/// Server-side storage: session bindings, registrations, key lists.
pub trait To0ServerStorage: SessionObserver + Send + Sync {
    /// Bind a freshly minted token to its nonce.
    fn bind_nonce(&self, token: &SessionToken, nonce: Nonce3) -> Result<(), RvError>;

    /// Look up the nonce bound to `token`.
    fn resolve_nonce(&self, token: &SessionToken) -> Result<Option<Nonce3>, RvError>;

    /// Drop the binding for `token`. Releasing an unknown token is not an
    /// error.
    fn release_session(&self, token: &SessionToken) -> Result<(), RvError>;

    /// Persist a registration, replacing any earlier one for the same
    /// GUID, and return the granted wait in seconds.
    fn store_redirect(&self, record: RedirectRecord) -> Result<u32, RvError>;

    /// Persisted allowlist.
    fn allowlist(&self) -> Result<Vec<String>, RvError>;

    /// Persisted denylist.
    fn denylist(&self) -> Result<Vec<String>, RvError>;

    /// Add fingerprints to the persisted allowlist; duplicates are ignored.
    fn insert_allowlist(&self, fingerprints: &[String]) -> Result<(), RvError>;

    /// Add fingerprints to the persisted denylist; duplicates are ignored.
    fn insert_denylist(&self, fingerprints: &[String]) -> Result<(), RvError>;
}

/// Client-side storage: what the owner registers, and its keys.
pub trait To0ClientStorage: SessionObserver {
    /// Voucher to register.
    fn voucher(&self) -> &OwnershipVoucher;

    /// Unsigned redirect to register.
    fn redirect_blob(&self) -> &RedirectBlob;

    /// Wait to ask for, in seconds.
    fn request_wait(&self) -> u32;

    /// Record the wait the server granted.
    fn set_response_wait(&mut self, granted: u32);

    /// Resolve the owner public key to a signer for its private key.
    fn owner_signing_key(&self, owner_key: &PublicKey) -> Result<Arc<dyn KeySigner>, RvError>;
}
