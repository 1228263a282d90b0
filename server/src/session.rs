//! Per-connection session task.
//!
//! Each upgraded WebSocket is driven by [`SessionHandler::run`], which owns
//! the socket for its whole life:
//!
//! ```text
//!   upgrade ──► writer task spawned ──► AuthGate::admit
//!                                          │
//!                     rejected ◄───────────┤ (close frame already queued)
//!                                          ▼
//!                                 `connected` acknowledgement
//!                                          │
//!                          ┌──────────────►│ read next frame
//!                          │               ▼
//!                          └──── Interceptor(Message) ─► BroadcastEngine
//!                                          │
//!                      peer close / transport fault / server close
//!                                          ▼
//!                         Interceptor(Close): evict ──► close frame
//! ```
//!
//! Frames are handled one at a time, in arrival order: the next frame is not
//! read until the previous handler has completed.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace};

use crate::auth::{AuthGate, CredentialSource};
use crate::broadcast::BroadcastEngine;
use crate::connection::{
    outbound_channel, Connection, ConnectionId, Outbound, OutboundReceiver, RawConnection,
};
use crate::error::ServerError;
use crate::interceptor::{EventInterceptor, EventKind};
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectedPayload, ControlFrame, InboundMessage, MessageEnvelope};

/// Largest accepted message body, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Runs connection sessions.
#[derive(Clone)]
pub struct SessionHandler {
    gate: AuthGate,
    engine: BroadcastEngine,
    interceptor: EventInterceptor,
    registry: Arc<ConnectionRegistry>,
}

impl SessionHandler {
    pub fn new(
        gate: AuthGate,
        engine: BroadcastEngine,
        interceptor: EventInterceptor,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            gate,
            engine,
            interceptor,
            registry,
        }
    }

    /// Drives `socket` from admission to close.
    pub async fn run(&self, socket: WebSocket, credentials: CredentialSource) {
        let (sink, mut stream) = socket.split();
        let (tx, rx) = outbound_channel();
        let id = ConnectionId::generate();
        let writer = tokio::spawn(write_outbound(sink, rx, id.clone()));

        let raw = RawConnection::new(id, tx);
        if let Ok(connection) = self.gate.admit(raw, &credentials).await {
            self.acknowledge(&connection);

            loop {
                let frame = tokio::select! {
                    _ = connection.closed() => break,
                    frame = stream.next() => frame,
                };
                let Some(frame) = frame else {
                    debug!(connection_id = %connection.id(), "Stream ended");
                    break;
                };

                match frame {
                    Ok(Message::Text(text)) => {
                        self.interceptor
                            .intercept(&connection, EventKind::Message, async {
                                self.relay(&connection, text.as_str())
                            })
                            .await;
                    }
                    Ok(Message::Binary(data)) => {
                        self.interceptor
                            .intercept(&connection, EventKind::Message, async {
                                Err(ServerError::validation(format!(
                                    "binary frames are not supported ({} bytes)",
                                    data.len()
                                ))
                                .into())
                            })
                            .await;
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(
                            connection_id = %connection.id(),
                            code = frame.as_ref().map(|f| f.code),
                            "Peer closed connection"
                        );
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        trace!(connection_id = %connection.id(), "Control frame");
                    }
                    Err(err) => {
                        self.interceptor
                            .intercept(&connection, EventKind::TransportError, async {
                                Err(ServerError::websocket(err.to_string()).into())
                            })
                            .await;
                        break;
                    }
                }
            }

            self.interceptor
                .intercept(&connection, EventKind::Close, async {
                    self.registry.evict(connection.id());
                    anyhow::Ok(())
                })
                .await;
            connection.close(close_code::NORMAL, "");

            info!(
                correlation_id = %connection.correlation_id(),
                connection_id = %connection.id(),
                subject = %connection.subject_id(),
                "Connection closed"
            );
        }

        if let Err(err) = writer.await {
            debug!(error = %err, "Writer task failed");
        }
    }

    /// Sends the `connected` acknowledgement.
    fn acknowledge(&self, connection: &Connection) {
        let ack = ControlFrame::Connected(ConnectedPayload {
            socket_id: connection.id().to_string(),
            request_id: connection.correlation_id().to_string(),
            user: connection.subject_id().to_string(),
        });
        if let Err(err) = connection.send_json(&ack) {
            debug!(connection_id = %connection.id(), error = %err, "Acknowledgement not delivered");
        }
    }

    /// Validates one inbound text frame and broadcasts it.
    fn relay(&self, connection: &Connection, text: &str) -> anyhow::Result<()> {
        let inbound: InboundMessage = serde_json::from_str(text)
            .map_err(|e| ServerError::validation(format!("invalid message frame: {e}")))?;
        let body = validate_body(inbound.message)?;

        let envelope = MessageEnvelope {
            sender_subject_id: connection.subject_id().to_string(),
            body,
        };
        let report = self.engine.broadcast(connection, &envelope)?;

        debug!(
            correlation_id = %connection.correlation_id(),
            connection_id = %connection.id(),
            delivered = report.succeeded,
            failed = report.failed,
            "Message relayed"
        );
        Ok(())
    }
}

/// Checks the message body constraints.
pub fn validate_body(body: String) -> Result<String, ServerError> {
    if body.trim().is_empty() {
        return Err(ServerError::validation("message cannot be empty"));
    }
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(ServerError::validation(format!(
            "message exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }
    Ok(body)
}

/// Drains a connection's outbound queue into the socket.
///
/// Stops after sending a close frame, when the socket fails, or when every
/// sender is gone.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    connection_id: ConnectionId,
) {
    while let Some(item) = rx.recv().await {
        let (message, last) = match item {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(err) = sink.send(message).await {
            debug!(connection_id = %connection_id, error = %err, "Socket write failed");
            break;
        }
        if last {
            break;
        }
    }
    trace!(connection_id = %connection_id, "Writer finished");
}
