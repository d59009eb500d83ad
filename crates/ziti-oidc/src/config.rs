//! Engine configuration.
//!
//! Token lifetimes, sweep cadence, native-client redirect URIs and the token
//! secret used by the protocol layer to encrypt opaque codes.
//!
//! # Example (TOML)
//!
//! ```toml
//! issuers = ["ctrl.example.com:1280", "10.0.0.5:1280"]
//! access_token_duration = "30m"
//! refresh_token_duration = "24h"
//! token_secret = "4d1b7c..."
//! ```

use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::issuer::Issuer;

/// Default access token lifetime.
pub const DEFAULT_ACCESS_TOKEN_DURATION: Duration = Duration::from_secs(30 * 60);

/// Default ID token lifetime.
pub const DEFAULT_ID_TOKEN_DURATION: Duration = Duration::from_secs(30 * 60);

/// Default refresh token lifetime.
pub const DEFAULT_REFRESH_TOKEN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Auth requests older than this are abandoned by the sweep.
pub const DEFAULT_AUTH_REQUEST_TTL: Duration = Duration::from_secs(10 * 60);

/// Configuration for the OIDC storage engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Id of this controller, stamped on emitted events.
    pub controller_id: String,

    /// `host[:port]` values this controller answers to as an issuer.
    pub issuers: Vec<String>,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_duration: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_duration: Duration,

    /// ID token lifetime for clients that do not set their own.
    #[serde(with = "humantime_serde")]
    pub id_token_duration: Duration,

    /// How often the sweep task runs.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Auth requests created longer ago than this are removed by the sweep.
    #[serde(with = "humantime_serde")]
    pub auth_request_ttl: Duration,

    /// Redirect URIs allowed for the built-in native client.
    pub redirect_uris: Vec<String>,

    /// Post-logout redirect URIs allowed for the built-in native client.
    pub post_logout_uris: Vec<String>,

    /// Secret the crypto key for opaque codes is derived from.
    pub token_secret: Option<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            controller_id: String::new(),
            issuers: vec!["localhost:1280".to_string()],
            access_token_duration: DEFAULT_ACCESS_TOKEN_DURATION,
            refresh_token_duration: DEFAULT_REFRESH_TOKEN_DURATION,
            id_token_duration: DEFAULT_ID_TOKEN_DURATION,
            cleanup_interval: Duration::from_secs(10),
            auth_request_ttl: DEFAULT_AUTH_REQUEST_TTL,
            redirect_uris: default_uris("callback"),
            post_logout_uris: default_uris("logout"),
            token_secret: None,
        }
    }
}

fn default_uris(path: &str) -> Vec<String> {
    vec![
        format!("openziti://auth/{path}"),
        format!("https://127.0.0.1:*/auth/{path}"),
        format!("http://127.0.0.1:*/auth/{path}"),
        format!("https://localhost:*/auth/{path}"),
        format!("http://localhost:*/auth/{path}"),
    ]
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl OidcConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the document is not valid TOML or has
    /// values of the wrong type.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The longest lifetime any issued token can have.
    ///
    /// Revocations that must outlive every token derived from a session use
    /// this as their expiry horizon.
    #[must_use]
    pub fn max_token_duration(&self) -> Duration {
        self.access_token_duration
            .max(self.refresh_token_duration)
            .max(self.id_token_duration)
    }

    /// Fills in a random 32-byte hex token secret when none is configured.
    pub fn ensure_token_secret(&mut self) {
        let blank = self
            .token_secret
            .as_deref()
            .is_none_or(|s| s.trim().is_empty());
        if blank {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            self.token_secret = Some(hex::encode(bytes));
        }
    }

    /// SHA-256 of the token secret.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no secret is configured.
    pub fn crypto_key(&self) -> Result<[u8; 32], ConfigError> {
        let secret = self
            .token_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing("token_secret".to_string()))?;
        Ok(Sha256::digest(secret.as_bytes()).into())
    }

    /// Parses the configured issuers.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first issuer that does not parse.
    pub fn parsed_issuers(&self) -> Result<Vec<Issuer>, ConfigError> {
        self.issuers
            .iter()
            .map(|s| {
                Issuer::parse(s)
                    .map_err(|e| ConfigError::InvalidValue(format!("issuer '{s}': {e}")))
            })
            .collect()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - no issuers are configured, or one does not parse
    /// - any duration is zero
    /// - the token secret is missing or blank
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuers.is_empty() {
            return Err(ConfigError::Missing("issuers".to_string()));
        }
        self.parsed_issuers()?;

        let durations = [
            ("access_token_duration", self.access_token_duration),
            ("refresh_token_duration", self.refresh_token_duration),
            ("id_token_duration", self.id_token_duration),
            ("cleanup_interval", self.cleanup_interval),
            ("auth_request_ttl", self.auth_request_ttl),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        self.crypto_key()?;
        Ok(())
    }
}
