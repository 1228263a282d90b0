//! Error types for the Gatehouse server.
//!
//! This module defines the top-level error used while handling events on an
//! authenticated connection. Every [`ServerError`] is a *recognized* failure:
//! it carries a stable machine-readable code and an HTTP-style status that are
//! echoed to the client in an error frame. Anything else that bubbles out of
//! an event handler is treated as unrecognized by the
//! [`interceptor`](crate::interceptor).
//!
//! # Example
//!
//! ```rust
//! use gatehouse_server::error::ServerError;
//!
//! fn validate_body(body: &str) -> Result<(), ServerError> {
//!     if body.trim().is_empty() {
//!         return Err(ServerError::validation("message cannot be empty"));
//!     }
//!     Ok(())
//! }
//!
//! let err = validate_body("   ").unwrap_err();
//! assert_eq!(err.error_code(), "VALIDATION_ERROR");
//! assert_eq!(err.status(), 400);
//! ```

use std::error::Error;
use std::fmt;

use crate::config::ConfigError;

/// Error code reported for failures the server does not recognize.
pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_ERROR";

/// Status reported for failures the server does not recognize.
pub const INTERNAL_ERROR_STATUS: u16 = 500;

/// Top-level error type for the Gatehouse server.
///
/// # Error Categories
///
/// - **Configuration errors**: Problems loading or validating server config
/// - **Authentication errors**: A credential was refused after admission
/// - **Validation errors**: Malformed or oversized inbound frames
/// - **WebSocket errors**: Transport failures on a connection
/// - **Internal errors**: Unexpected failures that don't fit other categories
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during server initialization or runtime.
    Config(ConfigError),

    /// Authentication or authorization failure.
    Auth(String),

    /// Inbound frame validation failure.
    ///
    /// Returned when a client sends a frame that cannot be parsed or whose
    /// content violates the message constraints.
    Validation(String),

    /// WebSocket connection or protocol error.
    ///
    /// Covers failures in message framing and delivery to the underlying
    /// transport.
    WebSocket(String),

    /// Unexpected internal server error.
    ///
    /// The message is logged but never sent to clients.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::WebSocket(msg) => write!(f, "websocket error: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

impl ServerError {
    /// Creates a new authentication error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use gatehouse_server::error::ServerError;
    ///
    /// let err = ServerError::auth("token revoked");
    /// assert!(matches!(err, ServerError::Auth(_)));
    /// ```
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use gatehouse_server::error::ServerError;
    ///
    /// let err = ServerError::validation("missing 'message' field");
    /// assert!(matches!(err, ServerError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable code sent to clients in error frames.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::WebSocket(_) => "WEBSOCKET_ERROR",
            Self::Internal(_) => INTERNAL_ERROR_CODE,
        }
    }

    /// HTTP-style status used for display on the client side.
    pub fn status(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::Validation(_) => 400,
            Self::WebSocket(_) => 502,
            Self::Config(_) | Self::Internal(_) => INTERNAL_ERROR_STATUS,
        }
    }

    /// Message that is safe to send to a client.
    ///
    /// Server-side failures are reduced to a generic message so internal
    /// details only reach the logs.
    pub fn client_message(&self) -> String {
        if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Validation(_))
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Config(_))
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
