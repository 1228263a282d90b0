//! Server configuration module.
//!
//! Parses configuration from environment variables for the Gatehouse server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HOST` | No | `0.0.0.0` | Bind address |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `GATEHOUSE_ALLOWED_ORIGINS` | No | any | Comma-separated origins allowed to upgrade |
//! | `GATEHOUSE_COOKIE_NAME` | No | `authToken` | Cookie carrying the bearer token |
//! | `GATEHOUSE_VERIFIER_URL` | Yes* | - | Remote token verification endpoint |
//! | `GATEHOUSE_VERIFIER_API_KEY` | No | - | API key sent to the remote verifier |
//! | `GATEHOUSE_JWT_PUBLIC_KEY` | Yes* | - | Base64 Ed25519 key for local token verification |
//! | `GATEHOUSE_VERIFY_TIMEOUT_MS` | No | 5000 | Upper bound on a single verification |
//! | `GATEHOUSE_SHUTDOWN_DRAIN_MS` | No | 5000 | Time allowed for connections to close on shutdown |
//! | `GATEHOUSE_HISTORY_CAPACITY` | No | 0 | Messages kept in the in-memory store (0 disables) |
//!
//! *Exactly one of `GATEHOUSE_VERIFIER_URL` and `GATEHOUSE_JWT_PUBLIC_KEY` must be set.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Default bind host.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default name of the credential cookie.
pub const DEFAULT_COOKIE_NAME: &str = "authToken";

/// Default bound on a single identity verification.
const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 5_000;

/// Default drain period for connection tasks during shutdown.
const DEFAULT_SHUTDOWN_DRAIN_MS: u64 = 5_000;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Where identity verification is performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierConfig {
    /// Tokens are introspected by a remote HTTP endpoint.
    Remote {
        /// Endpoint URL, called with `Authorization: Bearer <token>`.
        url: String,
        /// Optional API key sent as the `apikey` header.
        api_key: Option<String>,
    },

    /// Tokens are EdDSA-signed JWTs checked against a local public key.
    Jwt {
        /// Base64-encoded Ed25519 public key.
        public_key: String,
    },
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host.
    pub host: String,

    /// HTTP server port.
    pub port: u16,

    /// Origins allowed to open a connection. Empty means any origin.
    pub allowed_origins: Vec<String>,

    /// Name of the cookie carrying the bearer token.
    pub cookie_name: String,

    /// Identity verifier selection and parameters.
    pub verifier: VerifierConfig,

    /// Upper bound on a single verifier call.
    pub verify_timeout: Duration,

    /// How long shutdown waits for connection tasks to finish.
    pub shutdown_drain: Duration,

    /// Capacity of the in-memory message store; zero disables persistence.
    pub history_capacity: usize,
}

impl Config {
    /// Creates a configuration with default settings for the given verifier.
    pub fn new(verifier: VerifierConfig) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: Vec::new(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            verifier,
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS),
            shutdown_drain: Duration::from_millis(DEFAULT_SHUTDOWN_DRAIN_MS),
            history_capacity: 0,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Neither or both verifier sources are configured
    /// - Environment variables have invalid format
    /// - Port number is not a valid u16
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gatehouse_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on {}", config.bind_address());
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let verifier = parse_verifier()?;

        let config = Self {
            host: env_non_empty("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_port()?,
            allowed_origins: parse_origins(),
            cookie_name: env_non_empty("GATEHOUSE_COOKIE_NAME")
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            verifier,
            verify_timeout: parse_millis("GATEHOUSE_VERIFY_TIMEOUT_MS", DEFAULT_VERIFY_TIMEOUT_MS)?,
            shutdown_drain: parse_millis("GATEHOUSE_SHUTDOWN_DRAIN_MS", DEFAULT_SHUTDOWN_DRAIN_MS)?,
            history_capacity: parse_usize("GATEHOUSE_HISTORY_CAPACITY", 0)?,
        };

        config.validate()?;

        if config.allowed_origins.is_empty() {
            warn!("GATEHOUSE_ALLOWED_ORIGINS is not set - connections from any origin are accepted");
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.contains([';', '=', ' ']) {
            return Err(ConfigError::ValidationError(format!(
                "cookie name '{}' contains reserved characters",
                self.cookie_name
            )));
        }

        if self.verify_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "GATEHOUSE_VERIFY_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the `host:port` pair the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if a connection from `origin` may be upgraded.
    ///
    /// An empty allow-list or a `*` entry accepts every origin.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        let origin = origin.trim_end_matches('/');
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

/// Reads an environment variable, treating empty values as unset.
fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Selects the verifier from the environment.
fn parse_verifier() -> Result<VerifierConfig, ConfigError> {
    let url = env_non_empty("GATEHOUSE_VERIFIER_URL");
    let public_key = env_non_empty("GATEHOUSE_JWT_PUBLIC_KEY");

    match (url, public_key) {
        (Some(url), None) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidFormat {
                    var: "GATEHOUSE_VERIFIER_URL".to_string(),
                    message: format!("expected an http(s) URL, got '{url}'"),
                });
            }
            Ok(VerifierConfig::Remote {
                url,
                api_key: env_non_empty("GATEHOUSE_VERIFIER_API_KEY"),
            })
        }
        (None, Some(public_key)) => Ok(VerifierConfig::Jwt { public_key }),
        (Some(_), Some(_)) => Err(ConfigError::ValidationError(
            "set only one of GATEHOUSE_VERIFIER_URL and GATEHOUSE_JWT_PUBLIC_KEY".to_string(),
        )),
        (None, None) => Err(ConfigError::MissingEnvVar(
            "GATEHOUSE_VERIFIER_URL or GATEHOUSE_JWT_PUBLIC_KEY".to_string(),
        )),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the comma-separated origin allow-list.
fn parse_origins() -> Vec<String> {
    env_non_empty("GATEHOUSE_ALLOWED_ORIGINS")
        .map(|list| {
            list.split(',')
                .map(|origin| origin.trim().trim_end_matches('/'))
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a millisecond duration, falling back to `default_ms` when unset.
fn parse_millis(name: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    match env_non_empty(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidFormat {
                var: name.to_string(),
                message: format!("expected milliseconds: {e}"),
            }),
        None => Ok(Duration::from_millis(default_ms)),
    }
}

/// Parse a non-negative integer, falling back to `default` when unset.
fn parse_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match env_non_empty(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("expected a non-negative integer: {e}"),
        }),
        None => Ok(default),
    }
}
