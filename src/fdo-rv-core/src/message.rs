//! TO0 protocol messages.
//!
//! A message is a type tag, the protocol-info header carrying the session
//! token, and a body of named fields. Field values are JSON; typed access
//! goes through [`Message::get`] and [`Message::set`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RvError;
use crate::session::SessionToken;

/// Body field carrying the server's Nonce3.
pub const FIELD_NONCE3: &str = "Nonce3";
/// Body field carrying the serialized [`To0d`](crate::types::To0d).
pub const FIELD_TO0D: &str = "To0d";
/// Body field carrying the owner-signed redirect.
pub const FIELD_TO1D: &str = "To1d";
/// Body field carrying the granted wait in seconds.
pub const FIELD_WAIT_SECONDS: &str = "WaitSeconds";

/// TO0 message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MsgType {
    /// Client opens a session.
    Hello = 20,
    /// Server answers with a token and Nonce3.
    HelloAck = 21,
    /// Client submits the signed redirect.
    OwnerSign = 22,
    /// Server grants the lease.
    AcceptOwner = 23,
}

impl From<MsgType> for u8 {
    fn from(msg_type: MsgType) -> Self {
        msg_type as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(Self::Hello),
            21 => Ok(Self::HelloAck),
            22 => Ok(Self::OwnerSign),
            23 => Ok(Self::AcceptOwner),
            other => Err(format!("unknown TO0 message type {other}")),
        }
    }
}

/// Protocol-info header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// Session token, absent on the first message.
    #[serde(rename = "Token", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A TO0 message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type.
    #[serde(rename = "MsgType")]
    pub msg_type: MsgType,
    /// Protocol-info header.
    #[serde(rename = "ProtocolInfo", default)]
    pub protocol_info: ProtocolInfo,
    /// Named body fields.
    #[serde(rename = "Body", default)]
    pub body: Map<String, Value>,
}

impl Message {
    /// Create an empty message of the given type.
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            protocol_info: ProtocolInfo::default(),
            body: Map::new(),
        }
    }

    /// Session token from the protocol-info header.
    pub fn token(&self) -> Option<SessionToken> {
        self.protocol_info.token.as_deref().map(SessionToken::from)
    }

    /// Set the session token.
    pub fn set_token(&mut self, token: &SessionToken) {
        self.protocol_info.token = Some(token.as_str().to_string());
    }

    /// Builder form of [`set_token`](Self::set_token).
    pub fn with_token(mut self, token: &SessionToken) -> Self {
        self.set_token(token);
        self
    }

    /// Read a typed body field.
    ///
    /// # Errors
    ///
    /// `InvalidMessage` if the field is missing or has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, RvError> {
        let value = self
            .body
            .get(field)
            .ok_or_else(|| RvError::invalid_message(format!("missing field {field}")))?;

        T::deserialize(value)
            .map_err(|e| RvError::invalid_message(format!("field {field}: {e}")))
    }

    /// Write a typed body field, replacing any previous value.
    ///
    /// # Errors
    ///
    /// `InvalidMessage` if the value cannot be represented.
    pub fn set<T: Serialize>(&mut self, field: &str, value: &T) -> Result<(), RvError> {
        let value = serde_json::to_value(value)
            .map_err(|e| RvError::invalid_message(format!("field {field}: {e}")))?;
        self.body.insert(field.to_string(), value);
        Ok(())
    }

    /// Require a specific message type.
    pub fn expect_type(&self, expected: MsgType) -> Result<(), RvError> {
        if self.msg_type != expected {
            return Err(RvError::invalid_message(format!(
                "expected {expected:?}, got {:?}",
                self.msg_type
            )));
        }
        Ok(())
    }
}
