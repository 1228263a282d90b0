//! Fan-out of chat messages to every authenticated connection.
//!
//! [`BroadcastEngine::broadcast`] takes one snapshot of the
//! [`ConnectionRegistry`] and queues the serialized message on every open
//! connection in it, origin included. The snapshot and the fan-out run
//! without yielding to the runtime, so the recipient set is exactly the
//! registry contents at snapshot time.
//!
//! A recipient whose queue cannot accept the frame is counted as a failure
//! and logged at debug level. It never affects delivery to the others and is
//! never escalated to the sender.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse_server::broadcast::BroadcastEngine;
//! use gatehouse_server::registry::ConnectionRegistry;
//!
//! let registry = Arc::new(ConnectionRegistry::new());
//! let engine = BroadcastEngine::new(Arc::clone(&registry));
//! assert!(!engine.has_store());
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, StoredMessage};
use crate::types::{MessageEnvelope, OutboundMessage};

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Open connections a delivery was tried on.
    pub attempted: usize,

    /// Attempts whose frame was queued.
    pub succeeded: usize,

    /// Attempts whose frame could not be queued.
    pub failed: usize,

    /// Connections in the snapshot that were no longer open.
    pub skipped: usize,
}

/// Broadcasts envelopes to the registry's connections.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    store: Option<Arc<dyn MessageStore>>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            store: None,
        }
    }

    /// Persists every broadcast envelope to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Delivers `envelope` to every open connection, `origin` included.
    ///
    /// # Errors
    ///
    /// Fails only if the message cannot be serialized; per-recipient failures
    /// are reported in the returned [`DeliveryReport`].
    pub fn broadcast(
        &self,
        origin: &Connection,
        envelope: &MessageEnvelope,
    ) -> Result<DeliveryReport, ServerError> {
        let frame = serde_json::to_string(&OutboundMessage::from(envelope))?;
        let recipients = self.registry.snapshot();
        let mut report = DeliveryReport::default();

        for recipient in &recipients {
            if !recipient.is_open() {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match recipient.send_text(frame.clone()) {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    debug!(
                        correlation_id = %origin.correlation_id(),
                        recipient = %recipient.id(),
                        error = %err,
                        "Delivery failed"
                    );
                }
            }
        }

        trace!(
            correlation_id = %origin.correlation_id(),
            connection_id = %origin.id(),
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Broadcast complete"
        );

        self.persist(origin, envelope);
        Ok(report)
    }

    /// Hands the envelope to the store without waiting for it.
    fn persist(&self, origin: &Connection, envelope: &MessageEnvelope) {
        let Some(store) = &self.store else {
            return;
        };

        let store = Arc::clone(store);
        let message = StoredMessage {
            sender_subject_id: envelope.sender_subject_id.clone(),
            body: envelope.body.clone(),
            correlation_id: origin.correlation_id().to_string(),
            received_at: Utc::now(),
        };

        tokio::spawn(async move {
            let correlation_id = message.correlation_id.clone();
            if let Err(err) = store.append(message).await {
                warn!(correlation_id = %correlation_id, error = %err, "Failed to persist message");
            }
        });
    }
}
