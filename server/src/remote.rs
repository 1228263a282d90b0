//! Remote token introspection over HTTP.
//!
//! [`RemoteVerifier`] asks an external endpoint whether a bearer token is
//! valid. The endpoint is called with `GET <url>` and
//! `Authorization: Bearer <token>`, plus an `apikey` header when one is
//! configured.
//!
//! # Response Mapping
//!
//! | Response | Result |
//! |----------|--------|
//! | `2xx` with a JSON object carrying `sub` (or `id`) | [`Identity`] |
//! | `401` / `403` | [`VerifyError::Rejected`] |
//! | any other status | [`VerifyError::InvalidResponse`] |
//! | `2xx` with an unusable body | [`VerifyError::InvalidResponse`] |
//! | connection failure | [`VerifyError::Unavailable`] |
//! | request timeout | [`VerifyError::Timeout`] |
//!
//! The whole response body is kept as the identity's raw claims.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use gatehouse_server::remote::RemoteVerifier;
//! use gatehouse_server::verifier::IdentityVerifier;
//!
//! let verifier = RemoteVerifier::new(
//!     "https://auth.example.com/auth/v1/user",
//!     Some("anon-key".to_string()),
//!     Duration::from_secs(5),
//! )?;
//! let identity = verifier.verify("eyJhbGciOi...").await?;
//! println!("Authenticated subject: {}", identity.subject_id);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, error};

use crate::types::Identity;
use crate::verifier::{IdentityVerifier, VerifyError};

/// Verifier backed by a remote introspection endpoint.
///
/// The internal `reqwest::Client` is pooled and cheap to clone.
#[derive(Debug, Clone)]
pub struct RemoteVerifier {
    http_client: Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteVerifier {
    /// Creates a verifier for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            url: url.into(),
            api_key,
            timeout,
        })
    }

    /// Returns the introspection endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> VerifyError {
        if e.is_timeout() {
            VerifyError::Timeout(self.timeout)
        } else if e.is_connect() {
            VerifyError::Unavailable(format!("connection failed: {e}"))
        } else {
            VerifyError::Unavailable(format!("request failed: {e}"))
        }
    }
}

#[async_trait]
impl IdentityVerifier for RemoteVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        debug!(url = %self.url, "Introspecting token");

        let mut request = self.http_client.get(&self.url).bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = %status, "Token refused by verifier");
            return Err(VerifyError::rejected(format!("verifier answered {status}")));
        }

        if !status.is_success() {
            error!(status = %status, "Unexpected response from verifier");
            return Err(VerifyError::InvalidResponse(format!(
                "unexpected status {status}"
            )));
        }

        let claims: serde_json::Value = response.json().await.map_err(|e| {
            VerifyError::InvalidResponse(format!("failed to parse verifier response: {e}"))
        })?;

        let subject_id = claims
            .get("sub")
            .or_else(|| claims.get("id"))
            .and_then(serde_json::Value::as_str)
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| {
                VerifyError::InvalidResponse("response carries no subject id".to_string())
            })?
            .to_string();

        debug!(subject = %subject_id, "Token verified");
        Ok(Identity::new(subject_id, claims))
    }
}
