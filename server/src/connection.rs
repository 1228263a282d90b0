//! Connection values and their outbound frame channel.
//!
//! A transport connection starts life as a [`RawConnection`]: an id plus the
//! sending half of its outbound queue. That is the `Pending` phase and such a
//! handle is never placed in the registry. The [`AuthGate`](crate::auth::AuthGate)
//! turns it into an [`Connection`] in the `Authenticated` state, carrying the
//! verified [`Identity`] and the [`CorrelationId`] of the attempt.
//!
//! Frames are never written to the socket directly. They are queued as
//! [`Outbound`] items and drained by the connection's writer task, so code
//! holding a `Connection` can deliver without awaiting network I/O.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::correlation::{CorrelationId, EventId};
use crate::error::ServerError;
use crate::types::Identity;

/// An item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),

    /// A close frame; the writer stops after sending it.
    Close { code: u16, reason: String },
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving half of a connection's outbound queue, owned by the writer task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Creates an outbound queue.
///
/// The queue is unbounded: a consumer that cannot keep up accumulates frames
/// here rather than slowing down the broadcaster.
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// Transport-assigned connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Pending = 0,
    Authenticated = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Authenticated,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors returned when a frame cannot be queued for a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection has already been closed.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The writer task is gone, so the transport can no longer be written.
    #[error("transport for connection {0} is gone")]
    TransportGone(ConnectionId),
}

/// A connection that has not been authenticated yet.
#[derive(Debug, Clone)]
pub struct RawConnection {
    id: ConnectionId,
    outbound: OutboundSender,
}

impl RawConnection {
    pub fn new(id: ConnectionId, outbound: OutboundSender) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queues a close frame, used when admission is refused.
    ///
    /// Returns false if the writer task is already gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// An authenticated connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    correlation_id: CorrelationId,
    identity: Identity,
    created_at: DateTime<Utc>,
    state: AtomicU8,
    event_seq: AtomicU64,
    outbound: OutboundSender,
    closed: CancellationToken,
}

impl Connection {
    /// Builds an `Authenticated` connection from a pending handle.
    pub fn authenticate(raw: RawConnection, identity: Identity, correlation_id: CorrelationId) -> Self {
        Self {
            id: raw.id,
            correlation_id,
            identity,
            created_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Authenticated as u8),
            event_seq: AtomicU64::new(0),
            outbound: raw.outbound,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn subject_id(&self) -> &str {
        &self.identity.subject_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true while the connection accepts outbound frames.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Resolves once [`close`](Self::close) has succeeded.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Allocates the id of the next inbound event on this connection.
    pub fn next_event_id(&self) -> EventId {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.correlation_id.event(seq)
    }

    /// Queues a text frame.
    pub fn send_text(&self, text: String) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed(self.id.clone()));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| DeliveryError::TransportGone(self.id.clone()))
    }

    /// Serializes `frame` as JSON and queues it.
    pub fn send_json<T: Serialize>(&self, frame: &T) -> Result<(), ServerError> {
        let json = serde_json::to_string(frame)?;
        self.send_text(json)
            .map_err(|err| ServerError::websocket(err.to_string()))
    }

    /// Moves the connection to `Closed` and queues a close frame.
    ///
    /// Only the first call wins; later calls return false and send nothing.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let won = self
            .state
            .compare_exchange(
                ConnectionState::Authenticated as u8,
                ConnectionState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if won {
            // The writer may already be gone if the peer disconnected first.
            let _ = self.outbound.send(Outbound::Close {
                code,
                reason: reason.into(),
            });
            self.closed.cancel();
        }
        won
    }
}
