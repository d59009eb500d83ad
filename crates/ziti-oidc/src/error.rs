//! Error types for the OIDC engine.
//!
//! Every fallible engine operation returns [`OidcError`]. Errors raised by
//! collaborators (identity, MFA, revocation stores) are carried through
//! unchanged in [`OidcError::Collaborator`].

use std::fmt;

use crate::signing::JwtError;

/// Boxed error produced by an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for engine operations.
pub type OidcResult<T> = Result<T, OidcError>;

/// Errors that can occur while driving auth requests or issuing tokens.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// An auth request, code, client, device code, user code or key is unknown.
    #[error("{what} not found")]
    NotFound {
        /// What was being looked up.
        what: String,
    },

    /// Primary authentication was rejected.
    #[error("invalid authentication")]
    InvalidAuth,

    /// The TOTP code did not verify.
    #[error("invalid mfa token")]
    InvalidMfaToken,

    /// An input was empty or exceeded its allowed length.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the offending input.
        message: String,
    },

    /// A step was attempted before its prerequisites were met.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Description of the missing prerequisite.
        message: String,
    },

    /// The token failed to parse, verify, was revoked, or had the wrong subtype.
    #[error("invalid token: {message}")]
    InvalidToken {
        /// Description of why the token was rejected.
        message: String,
    },

    /// Silent authentication was requested but is not supported.
    #[error("login required")]
    LoginRequired,

    /// A device authorization with the same user code already exists.
    #[error("user code already exists")]
    DuplicateUserCode,

    /// A device authorization with the same device code already exists.
    #[error("device code already exists")]
    DuplicateDeviceCode,

    /// The token exchange request combines unsupported token types, audiences or scopes.
    #[error("unsupported token exchange: {message}")]
    UnsupportedTokenExchange {
        /// Description of the unsupported combination.
        message: String,
    },

    /// The client is unknown or its credentials did not match.
    #[error("invalid client: {message}")]
    InvalidClient {
        /// Description of why the client was rejected.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// A collaborator failed; the source is passed through.
    #[error("{message}: {source}")]
    Collaborator {
        /// Which collaborator call failed.
        message: String,
        /// The collaborator's own error.
        #[source]
        source: BoxError,
    },

    /// An unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl OidcError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedTokenExchange` error.
    #[must_use]
    pub fn unsupported_token_exchange(message: impl Into<String>) -> Self {
        Self::UnsupportedTokenExchange {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wraps a collaborator error.
    #[must_use]
    pub fn collaborator(message: impl Into<String>, source: BoxError) -> Self {
        Self::Collaborator {
            message: message.into(),
            source,
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for lookups that found nothing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the caller supplied bad credentials or input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if the failure is on the server side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Collaborator { .. } | Self::Internal { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::Lookup,
            Self::InvalidAuth | Self::InvalidMfaToken | Self::LoginRequired => {
                ErrorCategory::Authentication
            }
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::InvalidInput { .. }
            | Self::DuplicateUserCode
            | Self::DuplicateDeviceCode
            | Self::UnsupportedTokenExchange { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Collaborator { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 / OIDC error code a protocol layer should report.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "invalid_request",
            Self::InvalidAuth | Self::InvalidMfaToken => "access_denied",
            Self::InvalidInput { .. } => "invalid_request",
            Self::Unauthorized { .. } => "access_denied",
            Self::InvalidToken { .. } => "invalid_grant",
            Self::LoginRequired => "login_required",
            Self::DuplicateUserCode | Self::DuplicateDeviceCode => "invalid_request",
            Self::UnsupportedTokenExchange { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::Configuration { .. } | Self::Collaborator { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }
}

impl From<JwtError> for OidcError {
    fn from(err: JwtError) -> Self {
        if err.is_key_error() && !matches!(err, JwtError::KeyNotFound { .. }) {
            return Self::internal(err.to_string());
        }
        Self::invalid_token(err.to_string())
    }
}

/// Categories of engine errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Something that was looked up does not exist.
    Lookup,
    /// Credential or factor verification failed.
    Authentication,
    /// Token parsing, verification or revocation.
    Token,
    /// Request validation errors.
    Validation,
    /// Collaborator failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lookup => write!(f, "lookup"),
            Self::Authentication => write!(f, "authentication"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            OidcError::not_found("auth request").to_string(),
            "auth request not found"
        );
        assert_eq!(OidcError::LoginRequired.to_string(), "login required");
        assert_eq!(
            OidcError::invalid_input("code too long").to_string(),
            "invalid input: code too long"
        );
    }

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(OidcError::LoginRequired.oauth_error_code(), "login_required");
        assert_eq!(
            OidcError::invalid_token("revoked").oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(
            OidcError::invalid_client("bad secret").oauth_error_code(),
            "invalid_client"
        );
        assert_eq!(
            OidcError::internal("boom").oauth_error_code(),
            "server_error"
        );
    }

    #[test]
    fn test_collaborator_error_keeps_source() {
        let source: BoxError = "connection reset".into();
        let err = OidcError::collaborator("reading mfa", source);
        assert!(err.is_server_error());
        assert_eq!(err.category(), ErrorCategory::Infrastructure);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "reading mfa: connection reset");
    }

    #[test]
    fn test_jwt_errors_map_to_invalid_token() {
        let err: OidcError = JwtError::Expired.into();
        assert!(matches!(err, OidcError::InvalidToken { .. }));

        let err: OidcError = JwtError::key_not_found("abc").into();
        assert!(matches!(err, OidcError::InvalidToken { .. }));

        let err: OidcError = JwtError::invalid_key("bad pem").into();
        assert!(matches!(err, OidcError::Internal { .. }));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Token.to_string(), "token");
        assert_eq!(OidcError::DuplicateUserCode.category(), ErrorCategory::Validation);
    }
}
