//! Token issuance, refresh rotation, revocation and verification.

use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use crate::error::{OidcError, OidcResult};
use crate::events::{ApiSessionEvent, ApiSessionEventType};
use crate::signing::{decode_claims, encode_claims, header_kid};
use crate::storage::Revocation;
use crate::token::{
    AccessClaims, IdTokenClaims, JWT_TOKEN_PREFIX, RefreshClaims, RefreshTokenRequest,
    StandardClaims, TokenClaims, TokenRequest, TokenType,
};

use super::{RememberedClaims, StorageEngine, lifetime};

/// Scope tag carrying the API-session id across a scopes-only boundary.
pub const SCOPE_API_SESSION_PREFIX: &str = "asid:";

/// Scope tag carrying the access token id across a scopes-only boundary.
pub const SCOPE_TOKEN_ID_PREFIX: &str = "tid:";

/// Appends the API-session and token id tags to `scopes`.
///
/// Only protocol layers that hand back nothing but scopes need these; the
/// signed tokens carry the ids as claims.
#[must_use]
pub fn boundary_scopes(scopes: &[String], api_session_id: &str, token_id: &str) -> Vec<String> {
    let mut tagged = scopes.to_vec();
    if !api_session_id.is_empty() {
        tagged.push(format!("{SCOPE_API_SESSION_PREFIX}{api_session_id}"));
    }
    if !token_id.is_empty() {
        tagged.push(format!("{SCOPE_TOKEN_ID_PREFIX}{token_id}"));
    }
    tagged
}

/// A signed access token and its claims.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub claims: AccessClaims,
}

impl IssuedAccessToken {
    /// The token id (`jti`).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.claims.standard.jti
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.claims.standard.expires_at()
    }
}

/// An access token plus the refresh token issued alongside it.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: IssuedAccessToken,
    pub refresh_token: String,
    pub refresh_claims: RefreshClaims,
}

impl IssuedTokens {
    /// Access token expiry.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.access.expires_at()
    }

    /// Granted scopes with the boundary tags appended.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        boundary_scopes(
            &self.access.claims.custom.scopes,
            &self.access.claims.custom.api_session_id,
            self.access.id(),
        )
    }
}

impl StorageEngine {
    /// Mints an access token for `request`.
    ///
    /// Identity-backed requests read the identity fresh for its admin flag
    /// and external id and emit an API-session event.
    pub async fn create_access_token(
        &self,
        issuer: &str,
        request: &dyn TokenRequest,
    ) -> OidcResult<IssuedAccessToken> {
        request.ensure_complete()?;

        let now = OffsetDateTime::now_utc();
        let scopes = request.scopes();

        let mut standard = StandardClaims {
            iss: issuer.to_string(),
            sub: request.subject().to_string(),
            aud: request.audience(),
            auth_time: Some(request.auth_time().unwrap_or(now.unix_timestamp())),
            amr: request.amr(),
            client_id: request.client_id().to_string(),
            scope: scopes.join(" "),
            ..StandardClaims::default()
        };
        standard.stamp(now, lifetime(self.config.access_token_duration));

        let mut custom = request.seed_claims();
        custom.scopes = scopes;
        custom.token_type = Some(TokenType::Access);

        let event_type = ApiSessionEventType::for_origin(request.origin());
        if event_type.is_some() {
            let identity = self.read_identity(request.subject()).await?;
            custom.is_admin = identity.is_admin;
            custom.external_id = identity.external_id.unwrap_or_default();
        }

        let claims = AccessClaims { standard, custom };
        let token = encode_claims(&self.signing_key, &claims)?;

        self.issued_claims.insert(
            claims.standard.jti.clone(),
            RememberedClaims {
                subject: claims.standard.sub.clone(),
                custom: claims.custom.clone(),
                expires_at: claims.standard.expires_at(),
            },
        );

        if let Some(event_type) = event_type {
            self.collaborators.events.accept(ApiSessionEvent::new(
                event_type,
                self.config.controller_id.as_str(),
                claims.custom.api_session_id.as_str(),
                claims.standard.sub.as_str(),
                claims.custom.remote_address.as_str(),
            ));
        }

        tracing::debug!(
            jti = %claims.standard.jti,
            subject = %claims.standard.sub,
            client_id = %claims.standard.client_id,
            origin = ?request.origin(),
            "issued access token"
        );

        Ok(IssuedAccessToken { token, claims })
    }

    /// Mints an access token and a refresh token.
    ///
    /// With `current_refresh`, that token is rotated (and spent) before the
    /// access token is minted; otherwise a refresh token is derived from the
    /// new access claims.
    pub async fn create_access_and_refresh_tokens(
        &self,
        issuer: &str,
        request: &dyn TokenRequest,
        current_refresh: Option<&str>,
    ) -> OidcResult<IssuedTokens> {
        request.ensure_complete()?;

        let rotated = match current_refresh {
            Some(token) => Some(self.rotate_refresh_token(token).await?),
            None => None,
        };

        let access = self.create_access_token(issuer, request).await?;

        let (refresh_token, refresh_claims) = match rotated {
            Some(rotated) => rotated,
            None => {
                let claims = access.claims.to_refresh(
                    OffsetDateTime::now_utc(),
                    lifetime(self.config.refresh_token_duration),
                );
                (encode_claims(&self.signing_key, &claims)?, claims)
            }
        };

        Ok(IssuedTokens {
            access,
            refresh_token,
            refresh_claims,
        })
    }

    /// Mints an ID token, using the client's ID-token lifetime when the
    /// client is registered.
    pub async fn create_id_token(
        &self,
        issuer: &str,
        request: &dyn TokenRequest,
        nonce: Option<&str>,
    ) -> OidcResult<String> {
        request.ensure_complete()?;

        let now = OffsetDateTime::now_utc();
        let duration = self
            .client_by_id(request.client_id())
            .map(|c| c.id_token_lifetime)
            .unwrap_or(self.config.id_token_duration);

        let mut standard = StandardClaims {
            iss: issuer.to_string(),
            sub: request.subject().to_string(),
            aud: request.audience(),
            auth_time: Some(request.auth_time().unwrap_or(now.unix_timestamp())),
            amr: request.amr(),
            client_id: request.client_id().to_string(),
            nonce: nonce.filter(|n| !n.is_empty()).map(str::to_string),
            ..StandardClaims::default()
        };
        standard.stamp(now, lifetime(duration));

        let mut custom = request.seed_claims();
        custom.token_type = None;

        Ok(encode_claims(
            &self.signing_key,
            &IdTokenClaims { standard, custom },
        )?)
    }

    /// Spends `token` and returns its successor.
    ///
    /// The presented token is revoked before the new one is signed. A token
    /// already rotated by this process fails without touching the store.
    pub async fn rotate_refresh_token(&self, token: &str) -> OidcResult<(String, RefreshClaims)> {
        let mut claims = self.parse_refresh_token(token).await?;
        let jti = claims.standard.jti.clone();
        let expires_at = claims.standard.expires_at();

        match self.consumed_refresh.entry(jti.clone()) {
            Entry::Occupied(_) => {
                return Err(OidcError::invalid_token("refresh token already used"));
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
            }
        }

        if let Err(e) = self.save_revocation(Revocation::new(&jti, expires_at)).await {
            self.consumed_refresh.remove(&jti);
            return Err(e);
        }

        claims.standard.stamp(
            OffsetDateTime::now_utc(),
            lifetime(self.config.refresh_token_duration),
        );
        let renewed = encode_claims(&self.signing_key, &claims)?;

        tracing::debug!(
            previous = %jti,
            jti = %claims.standard.jti,
            subject = %claims.standard.sub,
            "rotated refresh token"
        );

        Ok((renewed, claims))
    }

    /// Validates a refresh token for the refresh grant.
    pub async fn token_request_by_refresh_token(
        &self,
        token: &str,
    ) -> OidcResult<RefreshTokenRequest> {
        Ok(RefreshTokenRequest::new(self.parse_refresh_token(token).await?))
    }

    /// Subject of a refresh token, and the token itself as its id.
    pub async fn refresh_token_info(&self, token: &str) -> OidcResult<(String, String)> {
        let claims = self
            .parse_refresh_token(token)
            .await
            .map_err(|_| OidcError::invalid_token("invalid refresh token"))?;
        Ok((claims.standard.sub, token.to_string()))
    }

    /// Revokes a token or token id.
    ///
    /// A serialized refresh token has its `jti` revoked until its own expiry;
    /// a serialized token that does not verify is ignored. The raw value is
    /// then revoked until the longest token lifetime has passed.
    pub async fn revoke_token(&self, token_or_id: &str) -> OidcResult<()> {
        if token_or_id.starts_with(JWT_TOKEN_PREFIX) {
            let claims = match self.parse_refresh_token(token_or_id).await {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring revocation of unverifiable token");
                    return Ok(());
                }
            };
            self.save_revocation(Revocation::new(
                claims.standard.jti.as_str(),
                claims.standard.expires_at(),
            ))
            .await?;
        }

        self.save_revocation(Revocation::new(token_or_id, self.max_token_horizon()))
            .await
    }

    /// Revokes every token issued to `identity_id` for `client_id` so far.
    pub async fn terminate_session(&self, identity_id: &str, client_id: &str) -> OidcResult<()> {
        tracing::info!(identity_id = %identity_id, client_id = %client_id, "terminating session");
        self.save_revocation(Revocation::new(
            session_key(identity_id, client_id),
            self.max_token_horizon(),
        ))
        .await
    }

    pub async fn is_token_revoked(&self, id: &str) -> OidcResult<bool> {
        Ok(self.read_revocation(id).await?.is_some())
    }

    /// Verifies a refresh token: signature, time claims, revocations and `z_t`.
    pub(super) async fn parse_refresh_token(&self, token: &str) -> OidcResult<RefreshClaims> {
        let claims: RefreshClaims = self.verify_token(token).await?;
        if claims.custom.token_type != Some(TokenType::Refresh) {
            return Err(OidcError::invalid_token("token is not a refresh token"));
        }
        Ok(claims)
    }

    /// Verifies a token issued by this cluster.
    ///
    /// Rejects tokens signed by a revoked kid, with a revoked `jti`, or whose
    /// session was terminated at or after the token was issued.
    pub(super) async fn verify_token<T: TokenClaims>(&self, token: &str) -> OidcResult<T> {
        let kid = header_kid(token)?;
        let key = self.verification_key(&kid).await?;
        let claims: T = decode_claims(token, &key)?;

        let standard = claims.standard();
        if self.is_token_revoked(&standard.jti).await? {
            return Err(OidcError::invalid_token("token is revoked"));
        }

        let session = session_key(&standard.sub, &standard.client_id);
        if let Some(revocation) = self.read_revocation(&session).await? {
            if revocation.created_at.unix_timestamp() >= standard.iat {
                return Err(OidcError::invalid_token("session is terminated"));
            }
        }

        Ok(claims)
    }

    fn max_token_horizon(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() + lifetime(self.config.max_token_duration())
    }
}

fn session_key(identity_id: &str, client_id: &str) -> String {
    format!("{identity_id},{client_id}")
}
