//! Owner (client) side of TO0 registration.
//!
//! The client sends Hello, captures the token and Nonce3 from HelloAck,
//! signs the redirect over them, and records the wait the server granted.
//! A granted wait shorter than requested is accepted as is.

use base64::Engine;
use fdo_crypto::KeySigner;
use tracing::{debug, info, instrument, warn};

use crate::error::RvError;
use crate::message::{
    Message, MsgType, FIELD_NONCE3, FIELD_TO0D, FIELD_TO1D, FIELD_WAIT_SECONDS,
};
use crate::session::{Lifecycle, Nonce3, SessionState, SessionToken};
use crate::storage::To0ClientStorage;
use crate::types::{to0d_hash, Lease, SignedRedirect, To0d, To1dPayload};
use crate::voucher::VoucherAccess;

/// Carries TO0 messages to a rendezvous server.
pub trait Transport {
    /// Send a request and wait for its reply.
    fn send(&mut self, msg: Message) -> Result<Message, RvError>;
}

/// TO0 client role.
pub struct To0Client<S: To0ClientStorage> {
    storage: S,
    lifecycle: Lifecycle,
    token: Option<SessionToken>,
}

impl<S: To0ClientStorage> To0Client<S> {
    /// Create a client for the registration held in `storage`.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            lifecycle: Lifecycle::new(),
            token: None,
        }
    }

    /// Client storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Consume the client, returning its storage.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Token issued by the server, once known.
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Produce the opening Hello.
    pub fn hello_message(&mut self) -> Result<Message, RvError> {
        let result = self
            .lifecycle
            .enter(SessionState::Starting, None, &self.storage)
            .map(|()| Message::new(MsgType::Hello));
        self.fail_on(result)
    }

    /// Take the server's HelloAck and produce the signed OwnerSign.
    pub fn handle_hello_ack(&mut self, reply: &Message) -> Result<Message, RvError> {
        let result = self.try_hello_ack(reply);
        self.fail_on(result)
    }

    fn try_hello_ack(&mut self, reply: &Message) -> Result<Message, RvError> {
        reply.expect_type(MsgType::HelloAck)?;
        let token = reply
            .token()
            .ok_or_else(|| RvError::invalid_message("HelloAck without a session token"))?;
        let nonce3: Nonce3 = reply.get(FIELD_NONCE3)?;

        self.lifecycle
            .enter(SessionState::Started, Some(&token), &self.storage)?;
        self.token = Some(token.clone());
        self.lifecycle
            .enter(SessionState::Continuing, Some(&token), &self.storage)?;

        let owner_key = self.storage.voucher().owner_public_key().clone();
        let signer = self.storage.owner_signing_key(&owner_key)?;
        let (to0d_bytes, signed) = self.build_signed_redirect(signer.as_ref(), nonce3)?;

        let mut msg = Message::new(MsgType::OwnerSign).with_token(&token);
        msg.set(
            FIELD_TO0D,
            &base64::engine::general_purpose::STANDARD.encode(to0d_bytes),
        )?;
        msg.set(FIELD_TO1D, &signed)?;
        Ok(msg)
    }

    /// Sign the stored redirect blob with the owner's key.
    ///
    /// Returns the encoded `To0d` (voucher, requested wait, `nonce3`) and
    /// the signed redirect committing to its hash.
    ///
    /// # Errors
    ///
    /// `ConfigError` if `signer` does not hold the voucher's owner key.
    pub fn build_signed_redirect(
        &self,
        signer: &dyn KeySigner,
        nonce3: Nonce3,
    ) -> Result<(Vec<u8>, SignedRedirect), RvError> {
        let voucher = self.storage.voucher();
        if &signer.public_key()? != voucher.owner_public_key() {
            return Err(RvError::ConfigError {
                message: "signing key does not match the voucher owner key".into(),
            });
        }

        let to0d = To0d {
            voucher: voucher.clone(),
            wait_seconds: self.storage.request_wait(),
            nonce3,
        };
        let to0d_bytes = to0d.to_bytes()?;

        let payload = To1dPayload {
            blob: self.storage.redirect_blob().clone(),
            to0d_hash: to0d_hash(&to0d_bytes),
        };
        let payload = serde_json::to_vec(&payload)
            .map_err(|e| RvError::invalid_message(format!("To1d payload: {e}")))?;
        let signature = signer.sign(&payload)?;

        debug!(guid = %voucher.guid(), "Redirect signed");
        Ok((to0d_bytes, SignedRedirect { payload, signature }))
    }

    /// Take the server's AcceptOwner and finish.
    pub fn handle_accept_owner(&mut self, reply: &Message) -> Result<Lease, RvError> {
        let result = self.try_accept_owner(reply);
        self.fail_on(result)
    }

    fn try_accept_owner(&mut self, reply: &Message) -> Result<Lease, RvError> {
        reply.expect_type(MsgType::AcceptOwner)?;
        let granted_wait: u32 = reply.get(FIELD_WAIT_SECONDS)?;
        let requested_wait = self.storage.request_wait();

        let token = self.token.clone();
        self.lifecycle
            .enter(SessionState::Continued, token.as_ref(), &self.storage)?;
        self.storage.set_response_wait(granted_wait);
        self.lifecycle
            .enter(SessionState::Completed, token.as_ref(), &self.storage)?;

        if granted_wait < requested_wait {
            debug!(requested_wait, granted_wait, "Server shortened the lease");
        }
        Ok(Lease {
            requested_wait,
            granted_wait,
        })
    }

    /// Abandon the session.
    pub fn fail(&mut self) {
        self.lifecycle.fail(self.token.as_ref(), &self.storage);
    }

    /// Run the whole exchange over `transport`.
    #[instrument(skip_all, fields(guid = %self.storage.voucher().guid()))]
    pub fn run<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Lease, RvError> {
        let hello = self.hello_message()?;
        let ack = self.send(transport, hello)?;
        let owner_sign = self.handle_hello_ack(&ack)?;
        let accept = self.send(transport, owner_sign)?;
        let lease = self.handle_accept_owner(&accept)?;

        info!(granted = lease.granted_wait, "Registration accepted");
        Ok(lease)
    }

    fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        msg: Message,
    ) -> Result<Message, RvError> {
        let result = transport.send(msg);
        self.fail_on(result)
    }

    fn fail_on<T>(&mut self, result: Result<T, RvError>) -> Result<T, RvError> {
        if let Err(e) = &result {
            warn!(error = %e, state = %self.lifecycle.state(), "TO0 client failed");
            self.fail();
        }
        result
    }
}
