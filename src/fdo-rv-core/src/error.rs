//! Error types for rendezvous registration and trust operations.

use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur during registration or revocation handling.
///
/// Verification failures are not errors: the trust engine reports them as
/// `false` so callers can tell "could not build trust" from a fault.
#[derive(Debug, Error)]
pub enum RvError {
    /// Session token could not be resolved or the owner key is not allowed.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// Certificate chain is empty.
    #[error("Certificate chain is empty")]
    InvalidChain,

    /// A revocation list reference could not be parsed.
    #[error("Invalid revocation list reference: {reference}")]
    InvalidReference {
        /// The offending reference.
        reference: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// Persistence collaborator failure.
    #[error("Storage error: {message}")]
    StorageError {
        /// Error message.
        message: String,
    },

    /// HTTPS error.
    #[error("HTTPS error: {message}")]
    HttpsError {
        /// Error message.
        message: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol message is missing a field or carries a malformed one.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// Reason the message was rejected.
        reason: String,
    },

    /// A session was driven through a transition its lifecycle forbids.
    #[error("Illegal session transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// State the session was in.
        from: SessionState,
        /// State that was requested.
        to: SessionState,
    },

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    CryptoError(#[from] fdo_crypto::CryptoError),
}

impl RvError {
    /// Shorthand for [`RvError::AuthenticationFailed`].
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RvError::InvalidMessage`].
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RvError::StorageError`].
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Check if this error is fatal to the session and must not be retried.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Check if this error points at caller or deployment misconfiguration.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidChain | Self::InvalidReference { .. } | Self::ConfigError { .. }
        )
    }

    /// Check if this error came from storage, network or the filesystem.
    #[must_use]
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self,
            Self::StorageError { .. } | Self::HttpsError { .. } | Self::Io(_)
        )
    }
}
