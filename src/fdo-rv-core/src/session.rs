//! Registration session lifecycle.
//!
//! ```text
//! Idle -> Starting -> Started -> { Continuing -> Continued }* -> Completed
//!                 \___________\____________\______________\__-> Failed
//! ```
//!
//! Every transition is reported to a [`SessionObserver`] so a storage
//! layer can track the session across round trips. A hook returning an
//! error aborts the session.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::RvError;

/// Length of a Nonce3 in bytes.
pub const NONCE3_LEN: usize = 16;

/// Lifecycle state of one registration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing exchanged yet.
    Idle,
    /// First exchange in progress.
    Starting,
    /// First exchange done; token issued.
    Started,
    /// A follow-up exchange is in progress.
    Continuing,
    /// A follow-up exchange is done.
    Continued,
    /// Registration succeeded.
    Completed,
    /// Registration aborted.
    Failed,
}

impl SessionState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use SessionState::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Starting)
            | (Starting, Started)
            | (Started, Continuing)
            | (Continuing, Continued)
            | (Continued, Continuing)
            | (Started, Completed)
            | (Continued, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Continuing => "continuing",
            Self::Continued => "continued",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Opaque session token, minted by the server and echoed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The token as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session replay nonce. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce3([u8; NONCE3_LEN]);

impl Nonce3 {
    /// Generate a random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE3_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing bytes.
    pub fn from_bytes(bytes: [u8; NONCE3_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE3_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce3({})", hex::encode(self.0))
    }
}

impl Serialize for Nonce3 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Nonce3 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = [0u8; NONCE3_LEN];
        hex::decode_to_slice(&encoded, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Receives every lifecycle transition of a session.
pub trait SessionObserver {
    /// Called after the session entered `state`.
    ///
    /// `token` is `None` until the server has issued one. An error aborts
    /// the session; errors from the `Failed` hook are logged and dropped.
    fn on_transition(
        &self,
        state: SessionState,
        token: Option<&SessionToken>,
    ) -> Result<(), RvError> {
        let _ = (state, token);
        Ok(())
    }
}

/// Transition guard for one session.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A session that has not exchanged anything.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    /// A session resumed from a token issued in an earlier exchange.
    pub fn resumed() -> Self {
        Self {
            state: SessionState::Started,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next` if the transition is legal.
    pub fn advance(&mut self, next: SessionState) -> Result<(), RvError> {
        if !self.state.can_transition_to(next) {
            return Err(RvError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Move to `next` and run the observer hook.
    pub fn enter<O: SessionObserver + ?Sized>(
        &mut self,
        next: SessionState,
        token: Option<&SessionToken>,
        observer: &O,
    ) -> Result<(), RvError> {
        self.advance(next)?;
        observer.on_transition(next, token)
    }

    /// Move to `Failed` and run the hook, unless already terminal.
    pub fn fail<O: SessionObserver + ?Sized>(
        &mut self,
        token: Option<&SessionToken>,
        observer: &O,
    ) {
        if self.advance(SessionState::Failed).is_err() {
            return;
        }
        if let Err(e) = observer.on_transition(SessionState::Failed, token) {
            warn!(error = %e, "Session failed hook returned an error");
        }
    }
}
