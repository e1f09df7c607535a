//! Rendezvous server side of TO0 registration.
//!
//! ## Flow
//!
//! ```text
//! Hello       -> begin_session      mint token, bind Nonce3     -> HelloAck
//! OwnerSign   -> resume_session     resolve token to Nonce3
//!             -> check To0d / To1d  nonce, hash, owner signature
//!             -> register_redirect  policy, revocation, persist -> AcceptOwner
//! ```
//!
//! Any failure after a session exists moves it to `Failed` and releases its
//! binding, so a Nonce3 is consumed exactly once.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use fdo_crypto::constant_time_eq;
use tracing::{debug, info, instrument, warn};

use crate::error::RvError;
use crate::message::{
    Message, MsgType, FIELD_NONCE3, FIELD_TO0D, FIELD_TO1D, FIELD_WAIT_SECONDS,
};
use crate::policy::KeyPolicy;
use crate::session::{Lifecycle, Nonce3, SessionState, SessionToken};
use crate::storage::To0ServerStorage;
use crate::trust::TrustEngine;
use crate::types::{to0d_hash, Lease, RedirectRecord, SignedRedirect, To0d};
use crate::voucher::VoucherAccess;

/// TO0 server role.
pub struct To0Server<S: To0ServerStorage> {
    storage: Arc<S>,
    policy: Arc<KeyPolicy>,
    trust: Option<TrustEngine>,
}

impl<S: To0ServerStorage> To0Server<S> {
    /// Create a server without device chain revocation checking.
    pub fn new(storage: Arc<S>, policy: Arc<KeyPolicy>) -> Self {
        Self {
            storage,
            policy,
            trust: None,
        }
    }

    /// Check device certificate chains carried by vouchers with `trust`.
    pub fn with_trust_engine(mut self, trust: TrustEngine) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Shared key policy.
    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Copy the persisted allow/deny lists into the key policy.
    pub fn load_policy(&self) -> Result<(), RvError> {
        self.policy.seed_allowlist(self.storage.allowlist()?);
        self.policy.seed_denylist(self.storage.denylist()?);
        Ok(())
    }

    /// Persist fingerprints to the allowlist and apply them.
    pub fn seed_allowlist(&self, fingerprints: &[String]) -> Result<(), RvError> {
        self.storage.insert_allowlist(fingerprints)?;
        self.policy.seed_allowlist(fingerprints.iter().cloned());
        Ok(())
    }

    /// Persist fingerprints to the denylist and apply them.
    pub fn seed_denylist(&self, fingerprints: &[String]) -> Result<(), RvError> {
        self.storage.insert_denylist(fingerprints)?;
        self.policy.seed_denylist(fingerprints.iter().cloned());
        Ok(())
    }

    /// Open a session: mint a token and bind a fresh Nonce3 to it.
    #[instrument(skip(self))]
    pub fn begin_session(&self) -> Result<(SessionToken, Nonce3), RvError> {
        let mut lifecycle = Lifecycle::new();
        let token = SessionToken::generate();
        let nonce = Nonce3::random();

        if let Err(e) = self.start(&mut lifecycle, &token, nonce) {
            warn!(error = %e, "Session start failed");
            lifecycle.fail(Some(&token), &*self.storage);
            self.release(&token);
            return Err(e);
        }

        debug!(token = %token, "Session started");
        Ok((token, nonce))
    }

    fn start(
        &self,
        lifecycle: &mut Lifecycle,
        token: &SessionToken,
        nonce: Nonce3,
    ) -> Result<(), RvError> {
        lifecycle.enter(SessionState::Starting, None, &*self.storage)?;
        self.storage.bind_nonce(token, nonce)?;
        lifecycle.enter(SessionState::Started, Some(token), &*self.storage)
    }

    /// Pick a session back up from the token the client echoed.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` if the token is not bound to a nonce.
    #[instrument(skip_all, fields(token = %token))]
    pub fn resume_session(&self, token: SessionToken) -> Result<ServerSession<'_, S>, RvError> {
        let mut lifecycle = Lifecycle::resumed();

        let resolved = lifecycle
            .enter(SessionState::Continuing, Some(&token), &*self.storage)
            .and_then(|()| self.storage.resolve_nonce(&token));

        match resolved {
            Ok(Some(nonce)) => Ok(ServerSession {
                server: self,
                token,
                nonce,
                lifecycle,
            }),
            Ok(None) => {
                warn!("Session token could not be resolved");
                lifecycle.fail(Some(&token), &*self.storage);
                Err(RvError::authentication("unknown session token"))
            },
            Err(e) => {
                lifecycle.fail(Some(&token), &*self.storage);
                self.release(&token);
                Err(e)
            },
        }
    }

    /// Handle one inbound TO0 message and produce the reply.
    pub fn handle(&self, msg: &Message) -> Result<Message, RvError> {
        match msg.msg_type {
            MsgType::Hello => {
                let (token, nonce) = self.begin_session()?;
                let mut reply = Message::new(MsgType::HelloAck).with_token(&token);
                reply.set(FIELD_NONCE3, &nonce)?;
                Ok(reply)
            },
            MsgType::OwnerSign => {
                let token = msg
                    .token()
                    .ok_or_else(|| RvError::authentication("missing session token"))?;
                let session = self.resume_session(token)?;

                let (to0d, signed_blob) = match session.check_owner_sign(msg) {
                    Ok(checked) => checked,
                    Err(e) => return Err(session.abort(e)),
                };

                let token = session.token().clone();
                let lease =
                    session.register_redirect(&to0d.voucher, to0d.wait_seconds, &signed_blob)?;

                let mut reply = Message::new(MsgType::AcceptOwner).with_token(&token);
                reply.set(FIELD_WAIT_SECONDS, &lease.granted_wait)?;
                Ok(reply)
            },
            other => Err(RvError::invalid_message(format!(
                "{other:?} is not a TO0 request"
            ))),
        }
    }

    fn release(&self, token: &SessionToken) {
        if let Err(e) = self.storage.release_session(token) {
            warn!(token = %token, error = %e, "Could not release session binding");
        }
    }
}

/// A resumed session whose token resolved to its Nonce3.
pub struct ServerSession<'a, S: To0ServerStorage> {
    server: &'a To0Server<S>,
    token: SessionToken,
    nonce: Nonce3,
    lifecycle: Lifecycle,
}

impl<'a, S: To0ServerStorage> ServerSession<'a, S> {
    /// Session token.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Nonce3 bound to the token.
    pub fn nonce(&self) -> Nonce3 {
        self.nonce
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Accept a registration and finish the session.
    ///
    /// Checks the owner key against the policy and, when the server has a
    /// trust engine and the voucher carries a device chain, the chain's
    /// revocation status. Then persists the redirect keyed by the voucher
    /// GUID and returns the granted lease.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` for a rejected owner key or device chain;
    /// storage errors as returned by the backend. The session is failed
    /// and its binding released either way.
    #[instrument(skip_all, fields(token = %self.token, guid = %voucher.guid()))]
    pub fn register_redirect(
        self,
        voucher: &dyn VoucherAccess,
        requested_wait: u32,
        signed_blob: &[u8],
    ) -> Result<Lease, RvError> {
        let mut session = self;
        match session.try_register(voucher, requested_wait, signed_blob) {
            Ok(lease) => {
                info!(
                    requested = lease.requested_wait,
                    granted = lease.granted_wait,
                    "Redirect registered"
                );
                Ok(lease)
            },
            Err(e) => Err(session.abort(e)),
        }
    }

    fn try_register(
        &mut self,
        voucher: &dyn VoucherAccess,
        requested_wait: u32,
        signed_blob: &[u8],
    ) -> Result<Lease, RvError> {
        let server = self.server;
        let fingerprint = voucher.owner_public_key().fingerprint();

        if !server.policy.is_allowed(&fingerprint) {
            warn!(fingerprint = %fingerprint, "Owner key rejected by policy");
            return Err(RvError::authentication("owner key is not allowed"));
        }

        if let Some(trust) = &server.trust {
            let chain = voucher.device_cert_chain();
            if !chain.is_empty() && !trust.check_chain(chain)? {
                return Err(RvError::authentication(
                    "device certificate chain failed revocation check",
                ));
            }
        }

        let record = RedirectRecord::new(
            voucher.guid(),
            signed_blob.to_vec(),
            fingerprint,
            voucher.device_public_key().map(|key| key.encoded),
            requested_wait,
            Utc::now(),
        );
        let granted_wait = server.storage.store_redirect(record)?;

        let storage = &*server.storage;
        self.lifecycle
            .enter(SessionState::Continued, Some(&self.token), storage)?;
        // Completed is terminal; everything fallible runs before it.
        storage.release_session(&self.token)?;
        self.lifecycle
            .enter(SessionState::Completed, Some(&self.token), storage)?;

        Ok(Lease {
            requested_wait,
            granted_wait,
        })
    }

    /// Check an OwnerSign message against this session.
    ///
    /// Returns the decoded `To0d` and the signed redirect encoding to
    /// persist.
    fn check_owner_sign(&self, msg: &Message) -> Result<(To0d, Vec<u8>), RvError> {
        let encoded: String = msg.get(FIELD_TO0D)?;
        let to0d_bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RvError::invalid_message(format!("{FIELD_TO0D}: {e}")))?;
        let to0d = To0d::from_bytes(&to0d_bytes)?;

        if !constant_time_eq(to0d.nonce3.as_bytes(), self.nonce.as_bytes()) {
            warn!(token = %self.token, "Nonce3 mismatch");
            return Err(RvError::authentication("Nonce3 does not match session"));
        }

        let signed: SignedRedirect = msg.get(FIELD_TO1D)?;
        let payload = signed.decode_payload()?;
        if !constant_time_eq(&payload.to0d_hash, &to0d_hash(&to0d_bytes)) {
            return Err(RvError::authentication("To1d does not commit to this To0d"));
        }

        match signed.verify(to0d.voucher.owner_public_key()) {
            Ok(true) => {},
            Ok(false) | Err(_) => {
                warn!(token = %self.token, "Owner signature did not verify");
                return Err(RvError::authentication("owner signature did not verify"));
            },
        }

        let blob = signed.to_bytes()?;
        Ok((to0d, blob))
    }

    /// Fail the session, release its binding, and hand back `error`.
    fn abort(mut self, error: RvError) -> RvError {
        warn!(token = %self.token, error = %error, "Registration failed");
        self.lifecycle
            .fail(Some(&self.token), &*self.server.storage);
        self.server.release(&self.token);
        error
    }
}
