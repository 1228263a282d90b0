//! HTTP route handlers for the Gatehouse server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /ws` - WebSocket upgrade; authentication happens on the socket
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (origin allow-list, cookie name, timeouts)
//! - The connection registry shared by every component
//! - The session handler that drives each upgraded socket
//! - The task tracker used to drain sessions on shutdown
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use gatehouse_server::config::Config;
//! use gatehouse_server::routes::{create_router, AppState};
//! use gatehouse_server::verifier;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let verifier = verifier::from_config(&config).expect("failed to build verifier");
//!     let state = AppState::new(config, verifier);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::auth::{AuthGate, CredentialSource};
use crate::broadcast::BroadcastEngine;
use crate::config::Config;
use crate::correlation::{CorrelationId, REQUEST_ID_HEADER};
use crate::interceptor::EventInterceptor;
use crate::registry::ConnectionRegistry;
use crate::session::SessionHandler;
use crate::shutdown::ShutdownCoordinator;
use crate::store::MessageStore;
use crate::verifier::IdentityVerifier;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Every field is cheap to clone; the state is cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Registry of authenticated connections.
    pub registry: Arc<ConnectionRegistry>,

    /// Drives upgraded sockets.
    pub sessions: SessionHandler,

    /// Tracks session tasks so shutdown can wait for them.
    pub tasks: TaskTracker,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state without message persistence.
    #[must_use]
    pub fn new(config: Config, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self::with_store(config, verifier, None)
    }

    /// Creates application state, persisting broadcasts to `store` when given.
    #[must_use]
    pub fn with_store(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        store: Option<Arc<dyn MessageStore>>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let gate = AuthGate::new(verifier, Arc::clone(&registry), config.verify_timeout);

        let mut engine = BroadcastEngine::new(Arc::clone(&registry));
        if let Some(store) = store {
            engine = engine.with_store(store);
        }

        let sessions = SessionHandler::new(
            gate,
            engine,
            EventInterceptor::new(Arc::clone(&registry)),
            Arc::clone(&registry),
        );

        Self {
            config: Arc::new(config),
            registry,
            sessions,
            tasks: TaskTracker::new(),
            start_time: Instant::now(),
        }
    }

    /// Builds the coordinator that shuts this state's connections down.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            Arc::clone(&self.registry),
            self.tasks.clone(),
            self.config.shutdown_drain,
        )
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("connections", &self.registry.size())
            .field("tasks", &self.tasks.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Returns
///
/// An axum `Router` with the following routes:
/// - `GET /ws` - WebSocket upgrade endpoint
/// - `GET /health` - Health check endpoint
///
/// Requests are traced with `TraceLayer` and answered with CORS headers for
/// the configured origins.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);

    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Attaches the correlation id to a response.
fn with_request_id(mut response: Response, correlation_id: &CorrelationId) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

// ============================================================================
// GET /ws - WebSocket Connection
// ============================================================================

/// GET /ws - WebSocket upgrade endpoint.
///
/// The `Origin` header is checked against the allow-list before upgrading.
/// Authentication is not performed here: the credential cookie is carried
/// into the session and checked by the auth gate, which reports refusals as
/// WebSocket close frames.
///
/// # Responses
///
/// - `101 Switching Protocols` - Upgrade accepted
/// - `403 Forbidden` - Origin not allowed
/// - `503 Service Unavailable` - Shutdown has begun
///
/// Every response carries the `x-request-id` of the attempt.
async fn get_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let credentials = CredentialSource::from_request(&headers, &jar, &state.config.cookie_name);
    let correlation_id = credentials.correlation_id().clone();

    if let Some(origin) = headers.get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !state.config.is_origin_allowed(origin) {
            warn!(correlation_id = %correlation_id, origin, "WebSocket origin not allowed");
            let response = (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("origin not allowed").with_code("origin_not_allowed")),
            )
                .into_response();
            return with_request_id(response, &correlation_id);
        }
    }

    if !state.registry.is_accepting() {
        debug!(correlation_id = %correlation_id, "Upgrade refused during shutdown");
        let response = (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("server shutting down").with_code("shutting_down")),
        )
            .into_response();
        return with_request_id(response, &correlation_id);
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return with_request_id(rejection.into_response(), &correlation_id),
    };

    debug!(
        correlation_id = %correlation_id,
        has_token = credentials.has_token(),
        "WebSocket client connecting"
    );

    let sessions = state.sessions.clone();
    let tasks = state.tasks.clone();
    let response = ws.on_upgrade(move |socket| {
        tasks.track_future(async move { sessions.run(socket, credentials).await })
    });
    with_request_id(response, &correlation_id)
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Time the response was generated.
    pub timestamp: DateTime<Utc>,

    /// Number of authenticated connections.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "timestamp": "2025-01-01T00:00:00Z",
///   "connections": 42,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        connections: state.registry.size(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
