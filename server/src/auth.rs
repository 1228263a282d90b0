//! Connection-time authentication gate.
//!
//! Every transport connection passes through [`AuthGate::admit`] exactly once,
//! before any application traffic is processed. The gate:
//!
//! 1. takes the correlation id resolved from the upgrade request,
//! 2. reads the bearer token from the credential cookie,
//! 3. asks the [`IdentityVerifier`] about it, bounded by a timeout,
//! 4. builds an `Authenticated` [`Connection`] and admits it to the registry.
//!
//! On refusal the gate queues a close frame on the raw connection and returns
//! a [`Rejection`]:
//!
//! | Reason | Close code | Close reason |
//! |--------|------------|--------------|
//! | [`RejectReason::MissingToken`] | 1008 | `Missing authentication token` |
//! | [`RejectReason::InvalidToken`] | 1008 | `Invalid authentication token` |
//! | [`RejectReason::AuthInfrastructureFailure`] | 1008 | `Authentication failed` |
//! | [`RejectReason::ShuttingDown`] | 1001 | `Server shutting down` |
//!
//! Each attempt emits one structured log line carrying the correlation id.
//! The token never appears in logs, errors or `Debug` output.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::close_code;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{event, info, Level};

use crate::connection::{Connection, ConnectionId, ConnectionState, RawConnection};
use crate::correlation::CorrelationId;
use crate::registry::{Admission, ConnectionRegistry};
use crate::verifier::IdentityVerifier;

/// Credentials and tracing context presented by a connection attempt.
#[derive(Clone)]
pub struct CredentialSource {
    token: Option<String>,
    correlation_id: CorrelationId,
}

impl CredentialSource {
    pub fn new(token: Option<String>, correlation_id: CorrelationId) -> Self {
        Self {
            token,
            correlation_id,
        }
    }

    /// Reads the token cookie and the `x-request-id` header of an upgrade request.
    pub fn from_request(headers: &HeaderMap, jar: &CookieJar, cookie_name: &str) -> Self {
        Self::new(
            jar.get(cookie_name).map(|cookie| cookie.value().to_string()),
            CorrelationId::from_headers(headers),
        )
    }

    /// The bearer token, if one was presented and is not blank.
    fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// Why a connection attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No token was presented.
    MissingToken,

    /// The verifier refused the token.
    InvalidToken,

    /// The verifier failed, timed out, or admission hit an internal conflict.
    AuthInfrastructureFailure,

    /// Shutdown has begun and no new connections are admitted.
    ShuttingDown,
}

impl RejectReason {
    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::AuthInfrastructureFailure => "auth_infrastructure_failure",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// WebSocket close code sent to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::ShuttingDown => close_code::AWAY,
            _ => close_code::POLICY,
        }
    }

    /// Close reason sent to the client.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Missing authentication token",
            Self::InvalidToken => "Invalid authentication token",
            Self::AuthInfrastructureFailure => "Authentication failed",
            Self::ShuttingDown => "Server shutting down",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            message: reason.message().to_string(),
        }
    }

    pub fn close_code(&self) -> u16 {
        self.reason.close_code()
    }
}

impl From<RejectReason> for Rejection {
    fn from(reason: RejectReason) -> Self {
        Self::new(reason)
    }
}

/// Decides whether a connection may join the registry.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn IdentityVerifier>,
    registry: Arc<ConnectionRegistry>,
    verify_timeout: Duration,
}

impl AuthGate {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        registry: Arc<ConnectionRegistry>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            registry,
            verify_timeout,
        }
    }

    /// Authenticates `raw` and admits it to the registry.
    ///
    /// On rejection a close frame has already been queued on `raw` when this
    /// returns. Verification is attempted once; there are no retries.
    pub async fn admit(
        &self,
        raw: RawConnection,
        credentials: &CredentialSource,
    ) -> Result<Arc<Connection>, Rejection> {
        let handle = raw.clone();
        let correlation_id = credentials.correlation_id();

        let result = self.authenticate(raw, credentials).await;
        match &result {
            Ok(connection) => info!(
                correlation_id = %correlation_id,
                connection_id = %connection.id(),
                subject = %connection.subject_id(),
                state = %connection.state(),
                "Connection admitted"
            ),
            Err((rejection, detail)) => {
                log_rejection(handle.id(), correlation_id, rejection.reason, detail.as_deref());
                handle.close(rejection.close_code(), rejection.message.clone());
            }
        }
        result.map_err(|(rejection, _)| rejection)
    }

    /// Runs the admission steps. Errors carry an optional detail for the log.
    async fn authenticate(
        &self,
        raw: RawConnection,
        credentials: &CredentialSource,
    ) -> Result<Arc<Connection>, (Rejection, Option<String>)> {
        let Some(token) = credentials.token() else {
            return Err((RejectReason::MissingToken.into(), None));
        };

        if !self.registry.is_accepting() {
            return Err((RejectReason::ShuttingDown.into(), None));
        }

        let identity = match timeout(self.verify_timeout, self.verifier.verify(token)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) if err.is_rejection() => {
                return Err((RejectReason::InvalidToken.into(), Some(err.to_string())));
            }
            Ok(Err(err)) => {
                return Err((
                    RejectReason::AuthInfrastructureFailure.into(),
                    Some(err.to_string()),
                ));
            }
            Err(_) => {
                return Err((
                    RejectReason::AuthInfrastructureFailure.into(),
                    Some(format!(
                        "verification exceeded {}ms",
                        self.verify_timeout.as_millis()
                    )),
                ));
            }
        };

        let connection = Arc::new(Connection::authenticate(
            raw,
            identity,
            credentials.correlation_id().clone(),
        ));

        // Acceptance is re-checked here: shutdown may have started while the
        // verifier call was suspended.
        match self.registry.admit(Arc::clone(&connection)) {
            Admission::Admitted => Ok(connection),
            Admission::Closed => Err((RejectReason::ShuttingDown.into(), None)),
            Admission::Duplicate => Err((
                RejectReason::AuthInfrastructureFailure.into(),
                Some("connection id already registered".to_string()),
            )),
        }
    }
}

fn log_rejection(
    connection_id: &ConnectionId,
    correlation_id: &CorrelationId,
    reason: RejectReason,
    detail: Option<&str>,
) {
    let detail = detail.unwrap_or("");
    let state = ConnectionState::Pending;

    macro_rules! rejected {
        ($level:expr) => {
            event!(
                $level,
                correlation_id = %correlation_id,
                connection_id = %connection_id,
                state = %state,
                reason = %reason,
                detail,
                "Connection rejected"
            )
        };
    }

    match reason {
        RejectReason::MissingToken | RejectReason::InvalidToken => rejected!(Level::WARN),
        RejectReason::AuthInfrastructureFailure => rejected!(Level::ERROR),
        RejectReason::ShuttingDown => rejected!(Level::INFO),
    }
}
