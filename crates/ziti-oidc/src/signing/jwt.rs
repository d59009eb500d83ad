//! JWT encoding and verification against certificate-derived keys.
//!
//! Tokens always carry the signing key's fingerprint in the `kid` header so a
//! verifier can pick the local key or the right peer key without trying each.

use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::key::{PublicKey, SigningKey};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token is not valid yet.
    #[error("Token not yet valid")]
    Immature,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// The token header does not name a key.
    #[error("Missing key id")]
    MissingKid,

    /// The specified key was not found.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was not found.
        kid: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },

    /// The key type or curve is not one the engine can sign or verify with.
    #[error("Unsupported key type: {key_type}")]
    UnsupportedKey {
        /// The key type or curve OID.
        key_type: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedKey` error.
    #[must_use]
    pub fn unsupported_key(key_type: impl Into<String>) -> Self {
        Self::UnsupportedKey {
            key_type: key_type.into(),
        }
    }

    /// Returns `true` if this is a validation error (expired, invalid signature, etc.).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::Immature | Self::InvalidSignature | Self::InvalidClaims { .. }
        )
    }

    /// Returns `true` if this is a key-related error.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::InvalidKey { .. } | Self::UnsupportedKey { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::Immature,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Encode / decode
// ============================================================================

/// Signs `claims` with `key`, stamping its fingerprint as `kid`.
///
/// # Errors
/// Returns an error if serialization or signing fails.
pub fn encode_claims<T: Serialize>(key: &SigningKey, claims: &T) -> Result<String, JwtError> {
    let mut header = Header::new(key.algorithm().to_jwt_algorithm());
    header.kid = Some(key.kid().to_string());

    encode(&header, claims, key.encoding_key()).map_err(|e| JwtError::encoding_error(e.to_string()))
}

/// Reads the `kid` header without verifying anything.
///
/// # Errors
/// Returns an error if the header is malformed or has no `kid`.
pub fn header_kid(token: &str) -> Result<String, JwtError> {
    decode_header(token)
        .map_err(JwtError::from)?
        .kid
        .ok_or(JwtError::MissingKid)
}

/// Verifies the signature and time claims of `token` against `key`.
///
/// Audience and issuer are checked by the caller; tokens are issued for
/// several issuer addresses and a fixed audience list.
///
/// # Errors
/// Returns an error if the token is malformed, expired or the signature does not verify.
pub fn decode_claims<T: DeserializeOwned>(token: &str, key: &PublicKey) -> Result<T, JwtError> {
    let mut validation = Validation::new(key.algorithm().to_jwt_algorithm());
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;

    decode::<T>(token, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(JwtError::from)
}

// ============================================================================
// Tests
// ============================================================================
