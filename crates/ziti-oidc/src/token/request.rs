//! Sources a token can be minted from.
//!
//! Claim building goes through [`TokenRequest`] so the engine has a single
//! issuance path regardless of whether the token comes from a fresh login,
//! a refresh, an exchange or client credentials.

use super::claims::{AccessClaims, CustomClaims, RefreshClaims, TokenType};
use crate::error::{OidcError, OidcResult};
use crate::oauth::{AuthRequest, ExchangeTokenType};

/// What kind of request a token is being minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenOrigin {
    /// A completed login.
    AuthRequest,
    /// A refresh token presented at the token endpoint.
    Refresh,
    /// An RFC 8693 token exchange.
    Exchange,
    /// A service client using the client-credentials grant.
    ClientCredentials,
}

/// Capability every token source exposes to claim building.
pub trait TokenRequest: Send + Sync {
    /// Subject of the minted token.
    fn subject(&self) -> &str;

    /// Client the token is minted for.
    fn client_id(&self) -> &str;

    fn audience(&self) -> Vec<String>;

    fn scopes(&self) -> Vec<String>;

    /// Authentication methods carried into the token.
    fn amr(&self) -> Vec<String>;

    /// Time of primary authentication; `None` means "now".
    fn auth_time(&self) -> Option<i64>;

    fn origin(&self) -> TokenOrigin;

    /// Custom claims the new token starts from. Identity flags, scopes and
    /// the subtype are filled in by the engine afterwards.
    fn seed_claims(&self) -> CustomClaims;

    /// `Ok` when tokens may be minted for this request.
    fn ensure_complete(&self) -> OidcResult<()> {
        Ok(())
    }
}

impl TokenRequest for AuthRequest {
    fn subject(&self) -> &str {
        &self.identity_id
    }

    fn client_id(&self) -> &str {
        &self.params.client_id
    }

    fn audience(&self) -> Vec<String> {
        vec![self.params.client_id.clone()]
    }

    fn scopes(&self) -> Vec<String> {
        self.params.scopes.clone()
    }

    fn amr(&self) -> Vec<String> {
        AuthRequest::amr(self)
    }

    fn auth_time(&self) -> Option<i64> {
        self.auth_time.map(|t| t.unix_timestamp())
    }

    fn origin(&self) -> TokenOrigin {
        TokenOrigin::AuthRequest
    }

    fn seed_claims(&self) -> CustomClaims {
        CustomClaims {
            api_session_id: self.api_session_id.clone(),
            application_id: self.params.client_id.clone(),
            config_types: self.config_types.clone(),
            cert_fingerprints: self.cert_fingerprints(),
            sdk_info: self.sdk_info.clone(),
            env_info: self.env_info.clone(),
            remote_address: self.remote_address.clone(),
            ..CustomClaims::default()
        }
    }

    fn ensure_complete(&self) -> OidcResult<()> {
        if self.done() {
            Ok(())
        } else {
            Err(OidcError::unauthorized(
                "additional authentication interactions are required",
            ))
        }
    }
}

/// A validated refresh token being turned into new tokens.
#[derive(Debug, Clone)]
pub struct RefreshTokenRequest {
    pub claims: RefreshClaims,
}

impl RefreshTokenRequest {
    #[must_use]
    pub fn new(claims: RefreshClaims) -> Self {
        Self { claims }
    }

    #[must_use]
    pub fn api_session_id(&self) -> &str {
        &self.claims.custom.api_session_id
    }
}

impl TokenRequest for RefreshTokenRequest {
    fn subject(&self) -> &str {
        &self.claims.standard.sub
    }

    fn client_id(&self) -> &str {
        &self.claims.standard.client_id
    }

    fn audience(&self) -> Vec<String> {
        self.claims.standard.aud.clone()
    }

    fn scopes(&self) -> Vec<String> {
        self.claims.standard.scopes()
    }

    fn amr(&self) -> Vec<String> {
        self.claims.standard.amr.clone()
    }

    fn auth_time(&self) -> Option<i64> {
        self.claims.standard.auth_time
    }

    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Refresh
    }

    fn seed_claims(&self) -> CustomClaims {
        self.claims.custom.clone()
    }
}

/// A validated token exchange, built from the subject token's claims.
#[derive(Debug, Clone)]
pub struct TokenExchangeRequest {
    pub client_id: String,
    pub requested_token_type: ExchangeTokenType,
    /// Scopes asked for in the exchange; empty means "keep the subject's".
    pub requested_scopes: Vec<String>,
    pub subject_claims: AccessClaims,
}

impl TokenExchangeRequest {
    /// Subtype of the subject token.
    #[must_use]
    pub fn subject_token_type(&self) -> Option<TokenType> {
        self.subject_claims.custom.token_type
    }
}

impl TokenRequest for TokenExchangeRequest {
    fn subject(&self) -> &str {
        &self.subject_claims.standard.sub
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn audience(&self) -> Vec<String> {
        self.subject_claims.standard.aud.clone()
    }

    fn scopes(&self) -> Vec<String> {
        if self.requested_scopes.is_empty() {
            self.subject_claims.custom.scopes.clone()
        } else {
            self.requested_scopes.clone()
        }
    }

    fn amr(&self) -> Vec<String> {
        self.subject_claims.standard.amr.clone()
    }

    fn auth_time(&self) -> Option<i64> {
        None
    }

    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Exchange
    }

    fn seed_claims(&self) -> CustomClaims {
        self.subject_claims.custom.clone()
    }
}

/// A service client authenticated with its shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentialsRequest {
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl TokenRequest for ClientCredentialsRequest {
    fn subject(&self) -> &str {
        &self.client_id
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn audience(&self) -> Vec<String> {
        vec![self.client_id.clone()]
    }

    fn scopes(&self) -> Vec<String> {
        self.scopes.clone()
    }

    fn amr(&self) -> Vec<String> {
        Vec::new()
    }

    fn auth_time(&self) -> Option<i64> {
        None
    }

    fn origin(&self) -> TokenOrigin {
        TokenOrigin::ClientCredentials
    }

    fn seed_claims(&self) -> CustomClaims {
        CustomClaims {
            application_id: self.client_id.clone(),
            ..CustomClaims::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{AMR_PASSWORD, AMR_TOTP, AuthorizeParams};
    use crate::token::StandardClaims;
    use time::OffsetDateTime;

    #[test]
    fn test_auth_request_seed_claims() {
        let mut req = AuthRequest::new(
            AuthorizeParams {
                client_id: "openziti".to_string(),
                scopes: vec!["openid".to_string()],
                ..AuthorizeParams::default()
            },
            OffsetDateTime::now_utc(),
        );
        req.identity_id = "identity-1".to_string();
        req.config_types = vec!["ct-1".to_string()];
        req.peer_certs = vec![b"not-really-der".to_vec()];
        req.add_amr(AMR_PASSWORD);

        let request: &dyn TokenRequest = &req;
        assert_eq!(request.subject(), "identity-1");
        assert_eq!(request.audience(), vec!["openziti"]);
        assert_eq!(request.amr(), vec!["password"]);
        assert_eq!(request.origin(), TokenOrigin::AuthRequest);

        let seed = request.seed_claims();
        assert_eq!(seed.api_session_id, req.api_session_id);
        assert_eq!(seed.application_id, "openziti");
        assert_eq!(seed.config_types, vec!["ct-1"]);
        assert_eq!(seed.cert_fingerprints.len(), 1);
        assert_eq!(seed.cert_fingerprints[0].len(), 40);
        assert!(request.ensure_complete().is_ok());
    }

    #[test]
    fn test_auth_request_incomplete_until_totp() {
        let mut req = AuthRequest::new(AuthorizeParams::default(), OffsetDateTime::now_utc());
        assert!(matches!(
            req.ensure_complete(),
            Err(OidcError::Unauthorized { .. })
        ));

        req.add_amr(AMR_PASSWORD);
        req.secondary_totp_required = true;
        assert!(matches!(
            req.ensure_complete(),
            Err(OidcError::Unauthorized { .. })
        ));

        req.add_amr(AMR_TOTP);
        assert!(req.ensure_complete().is_ok());
    }

    #[test]
    fn test_refresh_request_carries_claims_forward() {
        let claims = RefreshClaims {
            standard: StandardClaims {
                sub: "identity-1".to_string(),
                client_id: "openziti".to_string(),
                scope: "openid offline_access".to_string(),
                auth_time: Some(1_700_000_000),
                ..StandardClaims::default()
            },
            custom: CustomClaims {
                api_session_id: "asid-1".to_string(),
                token_type: Some(TokenType::Refresh),
                ..CustomClaims::default()
            },
        };
        let request = RefreshTokenRequest::new(claims);
        assert_eq!(request.api_session_id(), "asid-1");
        assert_eq!(request.scopes(), vec!["openid", "offline_access"]);
        assert_eq!(request.auth_time(), Some(1_700_000_000));
        assert_eq!(request.seed_claims().api_session_id, "asid-1");
    }

    #[test]
    fn test_exchange_scopes_fall_back_to_subject() {
        let mut subject_claims = AccessClaims::default();
        subject_claims.custom.scopes = vec!["openid".to_string()];
        let mut request = TokenExchangeRequest {
            client_id: "openziti".to_string(),
            requested_token_type: ExchangeTokenType::AccessToken,
            requested_scopes: Vec::new(),
            subject_claims,
        };
        assert_eq!(request.scopes(), vec!["openid"]);

        request.requested_scopes = vec!["offline_access".to_string()];
        assert_eq!(request.scopes(), vec!["offline_access"]);
    }

    #[test]
    fn test_client_credentials_subject_is_client() {
        let request = ClientCredentialsRequest {
            client_id: "svc".to_string(),
            scopes: vec![],
        };
        assert_eq!(request.subject(), "svc");
        assert_eq!(request.audience(), vec!["svc"]);
        assert!(request.amr().is_empty());
        assert_eq!(request.seed_claims().application_id, "svc");
    }
}
