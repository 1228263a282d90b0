//! Shared data types for the Gatehouse server.
//!
//! This module defines the verified [`Identity`] attached to a connection, the
//! [`MessageEnvelope`] exchanged after authentication, and the JSON frames
//! written to and read from the WebSocket.
//!
//! # Wire Frames
//!
//! | Direction | Shape |
//! |-----------|-------|
//! | client → server | `{"message": "..."}` |
//! | server → client, chat | `{"user": "...", "message": "..."}` |
//! | server → client, ack | `{"event": "connected", "data": {...}}` |
//! | server → client, error | `{"event": "error", "data": {...}}` |
//!
//! Chat frames never carry an `event` key, so control frames can not be
//! mistaken for application traffic.

use serde::{Deserialize, Serialize};

/// Result of a successful token verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Stable identifier of the authenticated subject.
    pub subject_id: String,

    /// Claims as reported by the verifier, kept opaque.
    pub raw_claims: serde_json::Value,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, raw_claims: serde_json::Value) -> Self {
        Self {
            subject_id: subject_id.into(),
            raw_claims,
        }
    }
}

/// A chat message after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub sender_subject_id: String,
    pub body: String,
}

/// Frame sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub message: String,
}

/// Chat frame fanned out to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub user: String,
    pub message: String,
}

impl From<&MessageEnvelope> for OutboundMessage {
    fn from(envelope: &MessageEnvelope) -> Self {
        Self {
            user: envelope.sender_subject_id.clone(),
            message: envelope.body.clone(),
        }
    }
}

/// Control frames, sent on reserved event names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Acknowledges admission and echoes the connection's identifiers.
    Connected(ConnectedPayload),

    /// Reports a failure that happened while handling an inbound event.
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub socket_id: String,
    pub request_id: String,
    pub user: String,
}

/// Normalized error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub error_code: String,
    pub status: u16,
    pub socket_id: String,
    pub request_id: String,
}
