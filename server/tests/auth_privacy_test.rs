//! Privacy tests for credentials in logs.
//!
//! Bearer tokens must never appear in log output, at any level, on any
//! admission path: missing, refused, failed or successful verification, and
//! the complete upgrade-to-close session.
//!
//! # Test Approach
//!
//! 1. Use a custom tracing subscriber Layer to capture all log events
//! 2. Exercise the auth gate with the remote and local verifiers
//! 3. Verify the tokens (and the verifier API key) are absent from the capture

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::prelude::*;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gatehouse_server::auth::{AuthGate, CredentialSource, RejectReason};
use gatehouse_server::config::{Config, VerifierConfig};
use gatehouse_server::connection::{outbound_channel, ConnectionId, RawConnection};
use gatehouse_server::correlation::CorrelationId;
use gatehouse_server::jwt::JwtVerifier;
use gatehouse_server::registry::ConnectionRegistry;
use gatehouse_server::remote::RemoteVerifier;
use gatehouse_server::routes::{create_router, AppState};
use gatehouse_server::verifier::IdentityVerifier;

const API_KEY: &str = "anon-key-7f3e91";

// ============================================================================
// Log Capture Infrastructure
// ============================================================================

#[derive(Clone, Default)]
struct LogCapture {
    logs: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn get_logs(&self) -> String {
        self.logs.lock().unwrap().join("\n")
    }
}

/// A tracing Layer that records every event and span field it sees.
struct CaptureLayer {
    capture: LogCapture,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: Context<'_, S>,
    ) {
        let mut visitor = StringVisitor::default();
        attrs.record(&mut visitor);
        let message = format!("[span] {}: {}", attrs.metadata().name(), visitor.into_string());
        self.capture.logs.lock().unwrap().push(message);
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);

        let message = format!(
            "[{}] {}: {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.into_string()
        );
        self.capture.logs.lock().unwrap().push(message);
    }
}

#[derive(Default)]
struct StringVisitor {
    parts: Vec<String>,
}

impl StringVisitor {
    fn into_string(self) -> String {
        self.parts.join(" ")
    }
}

impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.parts.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.parts.push(format!("{}={}", field.name(), value));
    }
}

/// Runs an async test body with every log event captured at TRACE level.
async fn with_log_capture_async<F, Fut>(test_fn: F) -> String
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let capture = LogCapture::default();
    let layer = CaptureLayer {
        capture: capture.clone(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(layer.with_filter(tracing_subscriber::filter::LevelFilter::TRACE));

    // `#[tokio::test]` runs on one thread, so spawned tasks share this default.
    let _guard = tracing::subscriber::set_default(subscriber);
    test_fn().await;

    capture.get_logs()
}

// ============================================================================
// Helpers
// ============================================================================

fn assert_not_in_logs(logs: &str, value: &str, context: &str) {
    assert!(
        !logs.contains(value),
        "Secret found in logs during {context}!\nValue: {value}\nLogs:\n{logs}"
    );
}

/// Asserts no JWT-shaped value (base64 of `{"`) appears in the logs.
fn assert_no_jwt_in_logs(logs: &str, context: &str) {
    assert!(
        !logs.contains("eyJ"),
        "JWT prefix 'eyJ' found in logs during {context}!\nLogs:\n{logs}"
    );
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn sign(key: &SigningKey, claims: serde_json::Value) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(json!({ "alg": "EdDSA", "typ": "JWT" }).to_string());
    let payload = BASE64_URL_SAFE_NO_PAD.encode(claims.to_string());
    let signed = format!("{header}.{payload}");
    let signature = BASE64_URL_SAFE_NO_PAD.encode(key.sign(signed.as_bytes()).to_bytes());
    format!("{signed}.{signature}")
}

async fn remote_verifier(server: &MockServer) -> Arc<dyn IdentityVerifier> {
    Arc::new(
        RemoteVerifier::new(
            format!("{}/auth/v1/user", server.uri()),
            Some(API_KEY.to_string()),
            Duration::from_secs(2),
        )
        .unwrap(),
    )
}

/// Runs one admission attempt through a gate and returns the outcome.
async fn attempt(verifier: Arc<dyn IdentityVerifier>, token: Option<&str>) -> Option<RejectReason> {
    let registry = Arc::new(ConnectionRegistry::new());
    let gate = AuthGate::new(verifier, registry, Duration::from_secs(2));
    let (tx, _rx) = outbound_channel();
    let raw = RawConnection::new(ConnectionId::generate(), tx);
    let credentials = CredentialSource::new(token.map(str::to_string), CorrelationId::generate());

    gate.admit(raw, &credentials).await.err().map(|rejection| rejection.reason)
}

// ============================================================================
// Remote verifier paths
// ============================================================================

#[tokio::test]
async fn token_not_logged_on_successful_remote_verification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("apikey", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "user-abc123" })))
        .mount(&server)
        .await;

    let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
        eyJzdWIiOiIxMjM0NTY3ODkwIiwibmFtZSI6IkpvaG4gRG9lIn0.\
        SflKxwRJSMeKKF2QT4fwpMeJf36POk6yJV_adQssw5c";
    let verifier = remote_verifier(&server).await;

    let logs = with_log_capture_async(|| async move {
        assert_eq!(attempt(verifier, Some(token)).await, None);
    })
    .await;

    assert!(logs.contains("Connection admitted"), "admission was not logged:\n{logs}");
    assert_no_jwt_in_logs(&logs, "successful remote verification");
    assert_not_in_logs(&logs, token, "successful remote verification");
    assert_not_in_logs(&logs, API_KEY, "successful remote verification");
}

#[tokio::test]
async fn token_not_logged_on_remote_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Token is expired or invalid"
        })))
        .mount(&server)
        .await;

    let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJleHAiOjB9.invalid_signature_here";
    let verifier = remote_verifier(&server).await;

    let logs = with_log_capture_async(|| async move {
        assert_eq!(
            attempt(verifier, Some(token)).await,
            Some(RejectReason::InvalidToken)
        );
    })
    .await;

    assert!(logs.contains("Connection rejected"), "rejection was not logged:\n{logs}");
    assert_no_jwt_in_logs(&logs, "remote rejection");
    assert_not_in_logs(&logs, token, "remote rejection");
}

#[tokio::test]
async fn token_not_logged_on_remote_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let token = "opaque-session-token-d41d8cd98f00b204";
    let verifier = remote_verifier(&server).await;

    let logs = with_log_capture_async(|| async move {
        assert_eq!(
            attempt(verifier, Some(token)).await,
            Some(RejectReason::AuthInfrastructureFailure)
        );
    })
    .await;

    assert_not_in_logs(&logs, token, "remote server error");
    assert_not_in_logs(&logs, API_KEY, "remote server error");
}

#[tokio::test]
async fn rejections_are_logged_once_at_their_reason_level() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer refused-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer outage-token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cases = [
        (None, RejectReason::MissingToken, "[WARN]"),
        (Some("refused-token"), RejectReason::InvalidToken, "[WARN]"),
        (Some("outage-token"), RejectReason::AuthInfrastructureFailure, "[ERROR]"),
    ];

    for (token, reason, level) in cases {
        let verifier = remote_verifier(&server).await;
        let logs = with_log_capture_async(|| async move {
            assert_eq!(attempt(verifier, token).await, Some(reason));
        })
        .await;

        let rejections: Vec<&str> = logs
            .lines()
            .filter(|line| line.contains("Connection rejected"))
            .collect();
        assert_eq!(rejections.len(), 1, "{reason:?}:\n{logs}");
        assert!(rejections[0].starts_with(level), "{reason:?}: {}", rejections[0]);
        assert!(rejections[0].contains(reason.as_str()), "{}", rejections[0]);
    }
}

// ============================================================================
// Local verifier paths
// ============================================================================

#[tokio::test]
async fn token_not_logged_on_local_verification() {
    let key = signing_key();
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(key.verifying_key()));
    let valid = sign(&key, json!({ "sub": "user-1" }));
    let expired = sign(&key, json!({ "sub": "user-1", "exp": 1 }));
    let forged = sign(&SigningKey::from_bytes(&[9u8; 32]), json!({ "sub": "admin" }));
    let attempts = vec![
        (valid.clone(), None),
        (expired.clone(), Some(RejectReason::InvalidToken)),
        (forged.clone(), Some(RejectReason::InvalidToken)),
    ];

    let logs = with_log_capture_async(|| async move {
        for (token, expected) in attempts {
            assert_eq!(attempt(Arc::clone(&verifier), Some(&token)).await, expected);
        }
    })
    .await;

    assert_no_jwt_in_logs(&logs, "local verification");
    for token in [&valid, &expired, &forged] {
        assert_not_in_logs(&logs, token, "local verification");
    }
}

#[tokio::test]
async fn credential_source_debug_is_redacted() {
    let source = CredentialSource::new(
        Some("super-secret-token".to_string()),
        CorrelationId::resolve(Some("req-1")),
    );
    let debug = format!("{source:?}");

    assert!(!debug.contains("super-secret-token"));
    assert!(debug.contains("[REDACTED]"));
}

// ============================================================================
// Full session
// ============================================================================

#[tokio::test]
async fn token_not_logged_across_a_full_session() {
    let key = signing_key();
    let token = sign(&key, json!({ "sub": "user-42" }));
    let public_key = BASE64_STANDARD.encode(key.verifying_key().to_bytes());
    let cookie = format!("authToken={token}");

    let logs = with_log_capture_async(|| async move {
        let config = Config::new(VerifierConfig::Jwt { public_key });
        let verifier = gatehouse_server::verifier::from_config(&config).unwrap();
        let state = AppState::new(config, verifier);
        let coordinator = state.coordinator();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("cookie", HeaderValue::from_str(&cookie).unwrap());
        let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        let ack = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap();
        assert!(ack.is_some());

        coordinator.shutdown().await;
    })
    .await;

    assert!(logs.contains("Connection admitted"), "admission was not logged:\n{logs}");
    assert_no_jwt_in_logs(&logs, "full session");
    assert_not_in_logs(&logs, &token, "full session");
}
