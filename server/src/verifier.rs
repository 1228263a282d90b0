//! Identity verification seam.
//!
//! The auth gate never inspects tokens itself. It hands them to an
//! [`IdentityVerifier`], which either returns the verified [`Identity`] or a
//! [`VerifyError`]. The error distinguishes a *rejection* (the token is bad)
//! from an *infrastructure failure* (the verifier could not decide), because
//! the two are reported to clients differently.
//!
//! Two implementations ship with the server:
//!
//! - [`RemoteVerifier`](crate::remote::RemoteVerifier) introspects tokens
//!   against an HTTP endpoint.
//! - [`JwtVerifier`](crate::jwt::JwtVerifier) checks EdDSA-signed JWTs
//!   against a locally configured Ed25519 public key.
//!
//! [`from_config`] picks one based on [`VerifierConfig`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, VerifierConfig};
use crate::jwt::JwtVerifier;
use crate::remote::RemoteVerifier;
use crate::types::Identity;

/// Errors returned by an [`IdentityVerifier`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The token was examined and refused.
    #[error("token rejected: {0}")]
    Rejected(String),

    /// The verification backend could not be reached.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    /// The verification backend did not answer in time.
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),

    /// The verification backend answered with something unexpected.
    #[error("invalid verifier response: {0}")]
    InvalidResponse(String),

    /// The verifier itself is misconfigured.
    #[error("verifier configuration error: {0}")]
    Configuration(String),
}

impl VerifyError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Returns `true` if the token itself was refused.
    ///
    /// Every other variant is an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Verifies bearer tokens and resolves them to an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `token`.
    ///
    /// Implementations must not log the token.
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

/// Builds the verifier selected by configuration.
///
/// # Errors
///
/// Returns [`VerifyError::Configuration`] if the selected verifier cannot be
/// constructed, e.g. because the public key does not decode.
pub fn from_config(config: &Config) -> Result<Arc<dyn IdentityVerifier>, VerifyError> {
    let verifier: Arc<dyn IdentityVerifier> = match &config.verifier {
        VerifierConfig::Remote { url, api_key } => Arc::new(RemoteVerifier::new(
            url.clone(),
            api_key.clone(),
            config.verify_timeout,
        )?),
        VerifierConfig::Jwt { public_key } => Arc::new(JwtVerifier::from_base64(public_key)?),
    };
    Ok(verifier)
}
