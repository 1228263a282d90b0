//! Gatehouse Server - Main entry point.
//!
//! This binary starts the gateway with:
//! - Structured JSON logging for production
//! - A remote or local token verifier, chosen by configuration
//! - Graceful shutdown handling (SIGTERM/SIGINT) that closes every
//!   WebSocket with `1001` before the listener stops
//!
//! # Configuration
//!
//! See [`gatehouse_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Remote verification
//! GATEHOUSE_VERIFIER_URL="https://auth.example.com/auth/v1/user" \
//! GATEHOUSE_VERIFIER_API_KEY="anon-key" \
//! PORT=8080 \
//! cargo run --release --bin gatehouse-server
//!
//! # Local EdDSA JWT verification
//! GATEHOUSE_JWT_PUBLIC_KEY="base64pubkey" cargo run --bin gatehouse-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use gatehouse_server::config::{Config, VerifierConfig};
use gatehouse_server::routes::{create_router, AppState};
use gatehouse_server::store::{MemoryStore, MessageStore};
use gatehouse_server::verifier;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables (exactly one):");
            eprintln!("  GATEHOUSE_VERIFIER_URL      - Remote token verification endpoint");
            eprintln!("  GATEHOUSE_JWT_PUBLIC_KEY    - Base64 Ed25519 key for local JWT checks");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                        - HTTP server port (default: 8080)");
            eprintln!("  GATEHOUSE_ALLOWED_ORIGINS   - Comma-separated origin allow-list");
            eprintln!("  GATEHOUSE_COOKIE_NAME       - Credential cookie (default: authToken)");
            eprintln!("  RUST_LOG                    - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    let verifier = match verifier::from_config(&config) {
        Ok(verifier) => verifier,
        Err(err) => {
            error!(error = %err, "Failed to initialize token verifier");
            return ExitCode::from(1);
        }
    };

    let verifier_kind = match &config.verifier {
        VerifierConfig::Remote { .. } => "remote",
        VerifierConfig::Jwt { .. } => "jwt",
    };
    info!(
        port = config.port,
        verifier = verifier_kind,
        allowed_origins = config.allowed_origins.len(),
        history_capacity = config.history_capacity,
        "Gatehouse server starting"
    );

    let store: Option<Arc<dyn MessageStore>> = if config.history_capacity > 0 {
        Some(Arc::new(MemoryStore::new(config.history_capacity)))
    } else {
        None
    };

    let bind_addr = config.bind_address();
    let state = AppState::with_store(config, verifier, store);
    let coordinator = state.coordinator();
    let app = create_router(state);

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let report = coordinator.shutdown().await;
        info!(
            closed = report.closed,
            drained = report.drained,
            "Connections closed"
        );
    });

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initializes structured JSON logging.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` with request
/// traces from `tower_http`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
