//! Token exchange (RFC 8693) request validation.
//!
//! Only exchanges that keep a session within Ziti are allowed: an access
//! token may be re-issued as an access token, and a refresh token may become
//! an access or refresh token. ID tokens are never accepted as subjects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OidcError, OidcResult};
use crate::token::{AUDIENCE_OPENZITI, CLIENT_ID_NATIVE_LEGACY, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID};

/// Token type URNs used by token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeTokenType {
    #[serde(rename = "urn:ietf:params:oauth:token-type:access_token")]
    AccessToken,
    #[serde(rename = "urn:ietf:params:oauth:token-type:refresh_token")]
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:token-type:id_token")]
    IdToken,
    #[serde(rename = "urn:ietf:params:oauth:token-type:jwt")]
    Jwt,
    #[serde(untagged)]
    Other(String),
}

impl ExchangeTokenType {
    /// Parses a token type URN.
    #[must_use]
    pub fn from_urn(urn: &str) -> Self {
        match urn {
            "urn:ietf:params:oauth:token-type:access_token" => Self::AccessToken,
            "urn:ietf:params:oauth:token-type:refresh_token" => Self::RefreshToken,
            "urn:ietf:params:oauth:token-type:id_token" => Self::IdToken,
            "urn:ietf:params:oauth:token-type:jwt" => Self::Jwt,
            other => Self::Other(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
            Self::Jwt => "jwt",
            Self::Other(_) => "unknown_token",
        }
    }
}

impl fmt::Display for ExchangeTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parameters of a token exchange request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeParams {
    pub client_id: String,
    pub subject_token: String,
    pub subject_token_type: ExchangeTokenType,
    /// `None` until validated; validation defaults it to refresh.
    pub requested_token_type: Option<ExchangeTokenType>,
    pub audience: Vec<String>,
    pub scopes: Vec<String>,
}

impl TokenExchangeParams {
    /// Scopes with the lone-empty-scope placeholder removed.
    #[must_use]
    pub fn effective_scopes(&self) -> Vec<String> {
        self.scopes.iter().filter(|s| !s.is_empty()).cloned().collect()
    }
}

/// Validates an exchange request, defaulting the requested type to refresh.
///
/// # Errors
///
/// Returns `OidcError::UnsupportedTokenExchange` for disallowed token type
/// combinations, audiences or scopes.
pub fn validate_token_exchange(params: &mut TokenExchangeParams) -> OidcResult<()> {
    let requested = params
        .requested_token_type
        .get_or_insert(ExchangeTokenType::RefreshToken)
        .clone();
    let subject = &params.subject_token_type;

    match subject {
        ExchangeTokenType::AccessToken => {
            if requested != ExchangeTokenType::AccessToken {
                return Err(OidcError::unsupported_token_exchange(format!(
                    "exchanging {subject} for {requested} is not supported"
                )));
            }
        }
        ExchangeTokenType::IdToken => {
            return Err(OidcError::unsupported_token_exchange(format!(
                "exchanging {subject} for any token type is not supported"
            )));
        }
        ExchangeTokenType::RefreshToken => {
            if requested != ExchangeTokenType::AccessToken
                && requested != ExchangeTokenType::RefreshToken
            {
                return Err(OidcError::unsupported_token_exchange(format!(
                    "exchanging {subject} for {requested} is not supported"
                )));
            }
        }
        ExchangeTokenType::Jwt | ExchangeTokenType::Other(_) => {
            return Err(OidcError::unsupported_token_exchange(format!(
                "exchange subject type ({subject}) is not supported"
            )));
        }
    }

    if let Some(aud) = params
        .audience
        .iter()
        .find(|a| a.as_str() != AUDIENCE_OPENZITI && a.as_str() != CLIENT_ID_NATIVE_LEGACY)
    {
        return Err(OidcError::unsupported_token_exchange(format!(
            "invalid audience requested [{aud}]"
        )));
    }

    let no_scopes = params.scopes.len() == 1 && params.scopes[0].is_empty();
    if !no_scopes {
        if let Some(scope) = params
            .scopes
            .iter()
            .find(|s| s.as_str() != SCOPE_OPENID && s.as_str() != SCOPE_OFFLINE_ACCESS)
        {
            return Err(OidcError::unsupported_token_exchange(format!(
                "invalid scope requested [{scope}]"
            )));
        }
    }

    Ok(())
}
