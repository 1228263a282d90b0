//! Error and trace interception for inbound events.
//!
//! Every event handled on an authenticated connection runs inside
//! [`EventInterceptor::intercept`]. The interceptor:
//!
//! - allocates an [`EventId`] and logs a start event with the connection's
//!   correlation id,
//! - awaits the handler, catching panics as well as returned errors,
//! - classifies a failure as *recognized* (a [`ServerError`] anywhere in the
//!   error chain) or *unrecognized* (anything else, including panics),
//! - reports it to the client as an error frame, or treats it as fatal for
//!   transport faults,
//! - logs an end event with the elapsed time and the [`Disposition`].
//!
//! Unrecognized failures are reported as `INTERNAL_ERROR` / 500 with a
//! generic message; their details only reach the logs.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::close_code;
use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::correlation::EventId;
use crate::error::{ServerError, INTERNAL_ERROR_CODE, INTERNAL_ERROR_STATUS};
use crate::registry::ConnectionRegistry;
use crate::types::{ControlFrame, ErrorPayload};

/// Generic message sent for failures the server does not recognize.
const GENERIC_ERROR_MESSAGE: &str = "Internal server error";

/// Close reason used when a transport fault terminates a connection.
const TRANSPORT_FAULT_REASON: &str = "Transport error";

/// Kind of inbound event being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An application message frame.
    Message,

    /// The peer closed the connection.
    Close,

    /// The transport reported a fault.
    TransportError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Close => "close",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an intercepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The handler succeeded.
    Completed,

    /// The handler failed and the client received an error frame.
    Reported,

    /// The failure terminated the connection.
    Fatal,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Reported => "reported",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler failure reduced to what is reported and logged.
#[derive(Debug)]
struct Failure {
    recognized: bool,
    error_code: &'static str,
    status: u16,
    client_message: String,
    detail: String,
}

impl Failure {
    fn from_error(err: &anyhow::Error) -> Self {
        let recognized = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<ServerError>());

        match recognized {
            Some(server_err) => Self {
                recognized: true,
                error_code: server_err.error_code(),
                status: server_err.status(),
                client_message: server_err.client_message(),
                detail: format!("{err:#}"),
            },
            None => Self::unrecognized(format!("{err:#}")),
        }
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::unrecognized(format!("handler panicked: {detail}"))
    }

    fn unrecognized(detail: String) -> Self {
        Self {
            recognized: false,
            error_code: INTERNAL_ERROR_CODE,
            status: INTERNAL_ERROR_STATUS,
            client_message: GENERIC_ERROR_MESSAGE.to_string(),
            detail,
        }
    }
}

/// Wraps inbound-event handlers with tracing and error handling.
#[derive(Clone)]
pub struct EventInterceptor {
    registry: Arc<ConnectionRegistry>,
}

impl EventInterceptor {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Runs `handler` for one event of `kind` on `connection`.
    ///
    /// The handler is awaited to completion before the end event is logged.
    pub async fn intercept<F>(&self, connection: &Connection, kind: EventKind, handler: F) -> Disposition
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let event_id = connection.next_event_id();
        let started_at = Utc::now();
        let start = Instant::now();

        debug!(
            correlation_id = %connection.correlation_id(),
            connection_id = %connection.id(),
            event_id = %event_id,
            event_kind = %kind,
            started_at = %started_at.to_rfc3339(),
            "Event started"
        );

        let disposition = match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(Ok(())) => Disposition::Completed,
            Ok(Err(err)) => self.fail(connection, kind, &event_id, Failure::from_error(&err)),
            Err(payload) => self.fail(connection, kind, &event_id, Failure::from_panic(payload)),
        };

        debug!(
            correlation_id = %connection.correlation_id(),
            connection_id = %connection.id(),
            event_id = %event_id,
            event_kind = %kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            disposition = %disposition,
            "Event finished"
        );

        disposition
    }

    fn fail(
        &self,
        connection: &Connection,
        kind: EventKind,
        event_id: &EventId,
        failure: Failure,
    ) -> Disposition {
        if kind == EventKind::TransportError {
            error!(
                correlation_id = %connection.correlation_id(),
                connection_id = %connection.id(),
                event_id = %event_id,
                error = %failure.detail,
                "Transport fault, closing connection"
            );
            connection.close(close_code::ERROR, TRANSPORT_FAULT_REASON);
            self.registry.evict(connection.id());
            return Disposition::Fatal;
        }

        if failure.recognized {
            warn!(
                correlation_id = %connection.correlation_id(),
                connection_id = %connection.id(),
                event_id = %event_id,
                error_code = failure.error_code,
                status = failure.status,
                error = %failure.detail,
                "Event handler failed"
            );
        } else {
            error!(
                correlation_id = %connection.correlation_id(),
                connection_id = %connection.id(),
                event_id = %event_id,
                error_code = failure.error_code,
                status = failure.status,
                error = %failure.detail,
                "Unrecognized event handler failure"
            );
        }

        let frame = ControlFrame::Error(ErrorPayload {
            message: failure.client_message,
            error_code: failure.error_code.to_string(),
            status: failure.status,
            socket_id: connection.id().to_string(),
            request_id: connection.correlation_id().to_string(),
        });

        if let Err(err) = connection.send_json(&frame) {
            debug!(
                correlation_id = %connection.correlation_id(),
                connection_id = %connection.id(),
                error = %err,
                "Error frame not delivered"
            );
        }

        Disposition::Reported
    }
}
