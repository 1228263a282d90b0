//! Local verification of EdDSA-signed JWTs.
//!
//! Tokens are compact JWS values, `header.payload.signature`, each part
//! base64url-encoded without padding. Decoding and validation go through
//! `jsonwebtoken`: the header must declare `"alg": "EdDSA"`, the Ed25519
//! signature over `header.payload` must match the configured public key, and
//! `exp`/`nbf` are enforced when present, with no leeway.
//!
//! On top of that the payload must carry a non-empty string `sub`.

use async_trait::async_trait;
use base64::prelude::*;
use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::types::Identity;
use crate::verifier::{IdentityVerifier, VerifyError};

/// Verifier for EdDSA JWTs signed by a single known key.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        // `exp` is optional; it is still checked whenever it is present.
        validation.required_spec_claims.clear();

        Self {
            // Takes the raw 32-byte public key, as in a JWK `x` component.
            key: DecodingKey::from_ed_der(key.as_bytes()),
            validation,
        }
    }

    /// Builds a verifier from a base64-encoded (standard alphabet) public key.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Configuration`] if the key does not decode to a
    /// valid Ed25519 public key.
    pub fn from_base64(public_key: &str) -> Result<Self, VerifyError> {
        let bytes = BASE64_STANDARD
            .decode(public_key.trim())
            .map_err(|_| VerifyError::Configuration("public key is not valid base64".into()))?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            VerifyError::Configuration(format!(
                "public key must be {PUBLIC_KEY_LENGTH} bytes"
            ))
        })?;

        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| VerifyError::Configuration("public key is not an Ed25519 point".into()))?;

        Ok(Self::new(key))
    }

    /// Validates the token and extracts its subject.
    fn check(&self, token: &str) -> Result<Identity, VerifyError> {
        let data = decode::<serde_json::Value>(token, &self.key, &self.validation)
            .map_err(|err| map_error(token, err))?;
        let claims = data.claims;

        let subject_id = claims
            .get("sub")
            .and_then(serde_json::Value::as_str)
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| VerifyError::rejected("token has no subject"))?
            .to_string();

        Ok(Identity::new(subject_id, claims))
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

fn map_error(token: &str, err: JwtError) -> VerifyError {
    match err.kind() {
        ErrorKind::InvalidSignature => VerifyError::rejected("signature mismatch"),
        ErrorKind::ExpiredSignature => VerifyError::rejected("token expired"),
        ErrorKind::ImmatureSignature => VerifyError::rejected("token not yet valid"),
        ErrorKind::InvalidAlgorithm => match decode_header(token) {
            Ok(header) => VerifyError::rejected(format!("unsupported algorithm {:?}", header.alg)),
            Err(_) => VerifyError::rejected("unsupported algorithm"),
        },
        ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::MissingAlgorithm => {
            VerifyError::Configuration(format!("verification key unusable: {err}"))
        }
        _ => VerifyError::rejected(format!("malformed token: {err}")),
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let result = self.check(token);
        match &result {
            Ok(identity) => debug!(subject = %identity.subject_id, "Token verified"),
            Err(err) => debug!(error = %err, "Token refused"),
        }
        result
    }
}
