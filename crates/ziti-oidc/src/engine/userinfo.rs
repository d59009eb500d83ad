//! User info, private claims and token exchange requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OidcError, OidcResult};
use crate::oauth::{ExchangeTokenType, TokenExchangeParams, validate_token_exchange};
use crate::token::{
    AccessClaims, CLAIM_API_SESSION_ID, SCOPE_OPENID, TokenExchangeRequest, TokenRequest,
    TokenType,
};

use super::StorageEngine;
use super::tokens::{SCOPE_API_SESSION_PREFIX, SCOPE_TOKEN_ID_PREFIX};

const BEARER_PREFIX: &str = "Bearer ";

/// Claims returned from the user info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "z_eid", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(rename = "z_ia", default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl StorageEngine {
    /// Private claims for a token, recovered from the boundary scope tags.
    ///
    /// A `tid:` tag naming a live token returns that token's custom claims;
    /// otherwise an `asid:` tag yields at least `z_asid`.
    pub fn private_claims_from_scopes(
        &self,
        identity_id: &str,
        _client_id: &str,
        scopes: &[String],
    ) -> OidcResult<Map<String, Value>> {
        let tagged = |prefix: &str| {
            scopes
                .iter()
                .find_map(|s| s.strip_prefix(prefix))
                .filter(|v| !v.is_empty())
        };

        if let Some(token_id) = tagged(SCOPE_TOKEN_ID_PREFIX) {
            let remembered = self
                .issued_claims
                .get(token_id)
                .filter(|c| identity_id.is_empty() || c.subject == identity_id)
                .map(|c| c.custom.clone());
            if let Some(custom) = remembered {
                return custom
                    .to_map()
                    .map_err(|e| OidcError::internal(format!("serializing claims: {e}")));
            }
        }

        let mut claims = Map::new();
        if let Some(api_session_id) = tagged(SCOPE_API_SESSION_PREFIX) {
            claims.insert(
                CLAIM_API_SESSION_ID.to_string(),
                Value::String(api_session_id.to_string()),
            );
        }
        Ok(claims)
    }

    /// User info for `identity_id`. Only the `openid` scope contributes.
    pub async fn userinfo_from_scopes(
        &self,
        identity_id: &str,
        scopes: &[String],
    ) -> OidcResult<UserInfo> {
        let identity = self
            .collaborators
            .identities
            .read(identity_id)
            .await
            .map_err(|e| OidcError::collaborator("reading identity", e))?
            .ok_or_else(|| OidcError::not_found("user"))?;

        let mut info = UserInfo::default();
        if scopes.iter().any(|s| s == SCOPE_OPENID) {
            info.sub = identity.id;
            info.name = identity.name;
            info.external_id = identity.external_id.filter(|e| !e.is_empty());
            info.is_admin = Some(identity.is_admin);
        }
        Ok(info)
    }

    /// User info for the bearer of an access token.
    ///
    /// `authorization` is the raw `Authorization` header value.
    pub async fn userinfo_from_token(
        &self,
        token_id: &str,
        subject: &str,
        authorization: &str,
    ) -> OidcResult<UserInfo> {
        if self.is_token_revoked(token_id).await? {
            return Err(OidcError::invalid_token("token is revoked"));
        }

        let token = authorization
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OidcError::invalid_token("no bearer token"))?;

        let claims: AccessClaims = self.verify_token(token).await?;
        if claims.custom.token_type != Some(TokenType::Access) {
            return Err(OidcError::invalid_token("token is invalid type"));
        }

        self.userinfo_from_scopes(subject, &claims.custom.scopes).await
    }

    /// Private claims of the subject token behind an exchange.
    pub fn private_claims_from_token_exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> OidcResult<Map<String, Value>> {
        request
            .subject_claims
            .custom
            .to_map()
            .map_err(|e| OidcError::internal(format!("serializing claims: {e}")))
    }

    pub async fn userinfo_from_token_exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> OidcResult<UserInfo> {
        self.userinfo_from_scopes(request.subject(), &request.scopes())
            .await
    }

    /// Introspection is not offered.
    pub fn introspection_from_token(&self, _token_id: &str, _subject: &str) -> OidcResult<()> {
        Err(OidcError::internal("unsupported"))
    }

    /// Validates an exchange and verifies its subject token.
    ///
    /// The subject token's `z_t` must agree with the declared subject type.
    pub async fn token_exchange_request(
        &self,
        mut params: TokenExchangeParams,
    ) -> OidcResult<TokenExchangeRequest> {
        validate_token_exchange(&mut params)?;

        let subject_claims: AccessClaims = self.verify_token(&params.subject_token).await?;
        let expected = match params.subject_token_type {
            ExchangeTokenType::AccessToken => TokenType::Access,
            _ => TokenType::Refresh,
        };
        if subject_claims.custom.token_type != Some(expected) {
            return Err(OidcError::invalid_token(format!(
                "subject token is not a {}",
                params.subject_token_type
            )));
        }

        Ok(TokenExchangeRequest {
            client_id: params.client_id.clone(),
            requested_token_type: params
                .requested_token_type
                .clone()
                .unwrap_or(ExchangeTokenType::RefreshToken),
            requested_scopes: params.effective_scopes(),
            subject_claims,
        })
    }
}
