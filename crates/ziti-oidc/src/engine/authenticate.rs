//! Primary authentication, secondary factors and TOTP enrollment.

use time::OffsetDateTime;

use crate::error::{OidcError, OidcResult};
use crate::oauth::{AMR_CERT, AMR_TOTP, AuthRequest, secondary_ext_jwt_amr};
use crate::storage::{AuthContext, AuthResult, Mfa};

use super::StorageEngine;

/// Longest TOTP code accepted, including recovery codes.
const MAX_TOTP_CODE_LEN: usize = 13;

/// Longest auth request id accepted.
const MAX_AUTH_REQUEST_ID_LEN: usize = 40;

impl StorageEngine {
    /// Verifies a primary credential and records it on request `id`.
    ///
    /// On success the request gains the method's AMR, the identity, the
    /// mapped config types and the secondary-factor requirements from the
    /// identity's MFA enrollment and auth policy. Once a request is done its
    /// identity and secondary requirements are fixed, so a repeated login
    /// never makes it incomplete again.
    pub async fn authenticate(
        &self,
        ctx: &AuthContext,
        id: &str,
        config_type_names: &[String],
    ) -> OidcResult<AuthRequest> {
        if !self.auth_requests.contains_key(id) {
            return Err(OidcError::not_found("auth request"));
        }

        let result = self.authorize(ctx).await?;
        if !result.success {
            tracing::debug!(auth_request_id = %id, method = %ctx.method, "primary authentication failed");
            return Err(OidcError::InvalidAuth);
        }

        let config_types = if config_type_names.is_empty() {
            Vec::new()
        } else {
            self.map_config_types(config_type_names, &result.identity_id)
                .await?
        };

        let totp_enrolled = self
            .read_mfa(&result.identity_id)
            .await?
            .is_some_and(|mfa| mfa.is_verified);

        let ext_jwt_signer = match result
            .required_ext_jwt_signer
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            Some(signer_id) => Some(
                self.collaborators
                    .identities
                    .read_ext_jwt_signer(signer_id)
                    .await
                    .map_err(|e| OidcError::collaborator("reading external jwt signer", e))?
                    .ok_or_else(|| OidcError::not_found(format!("external jwt signer {signer_id}")))?,
            ),
            None => None,
        };

        let mut request = self
            .auth_requests
            .get_mut(id)
            .ok_or_else(|| OidcError::not_found("auth request"))?;

        let was_done = request.done();
        if was_done && request.identity_id != result.identity_id {
            return Err(OidcError::unauthorized(
                "auth request is already complete for another identity",
            ));
        }

        request.identity_id = result.identity_id.clone();
        request.add_amr(ctx.method.clone());
        request.auth_time = Some(OffsetDateTime::now_utc());
        request.authenticator_id = result.authenticator_id.clone();

        if let Some(cert) = result.cert {
            request.is_cert_extend_requested = cert.is_extend_requested;
            request.is_cert_key_roll_requested = cert.is_key_roll_requested;
        }

        for config_type in config_types {
            if !request.config_types.contains(&config_type) {
                request.config_types.push(config_type);
            }
        }

        if !was_done {
            request.is_totp_enrolled = totp_enrolled;
            request.secondary_totp_required = totp_enrolled || result.require_totp;
            if ext_jwt_signer.is_some() {
                request.secondary_ext_jwt_signer = ext_jwt_signer;
            }
        }

        if ctx.method == AMR_CERT {
            if request.peer_certs.is_empty() {
                request.peer_certs = ctx.certs.clone();
            }
            if let Some(cert) = result.cert {
                request.is_cert_extendable = cert.is_issued_by_network;
                request.improper_client_cert_chain = result.improper_client_cert_chain;
            }
        }

        tracing::info!(
            auth_request_id = %id,
            identity_id = %request.identity_id,
            method = %ctx.method,
            totp_required = request.secondary_totp_required,
            ext_jwt_required = request.secondary_ext_jwt_signer.is_some(),
            "primary authentication succeeded"
        );

        Ok(request.clone())
    }

    /// Verifies a TOTP code for request `id` and records the `totp` AMR.
    ///
    /// Input lengths are checked before anything is looked up.
    pub async fn verify_totp(&self, code: &str, id: &str) -> OidcResult<AuthRequest> {
        let code = code.trim();
        let id = id.trim();

        if code.len() > MAX_TOTP_CODE_LEN || id.len() > MAX_AUTH_REQUEST_ID_LEN {
            return Err(OidcError::invalid_input("code or request id too long"));
        }
        if code.is_empty() {
            return Err(OidcError::invalid_input("code is required"));
        }
        if id.is_empty() {
            return Err(OidcError::invalid_input("invalid request"));
        }

        let request = self.auth_request_by_id(id)?;
        if !request.has_any_amr() {
            return Err(OidcError::unauthorized("request not authorized"));
        }

        let mfa = self
            .collaborators
            .mfa
            .read_one_by_identity_id(&request.identity_id)
            .await
            .map_err(|e| OidcError::collaborator("could not read totp status", e))?
            .ok_or_else(|| OidcError::not_found("totp"))?;

        let verified = match self.collaborators.mfa.verify(&mfa, code).await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::warn!(auth_request_id = %id, error = %e, "totp verification errored");
                false
            }
        };
        if !verified {
            return Err(OidcError::InvalidMfaToken);
        }

        let mut request = self
            .auth_requests
            .get_mut(id)
            .ok_or_else(|| OidcError::not_found("auth request"))?;
        request.add_amr(AMR_TOTP);
        Ok(request.clone())
    }

    /// Verifies a token from the request's required external JWT signer.
    ///
    /// The token must be for the identity that completed primary auth.
    pub async fn verify_secondary_ext_jwt(
        &self,
        ctx: &AuthContext,
        id: &str,
    ) -> OidcResult<AuthRequest> {
        let request = self.auth_request_by_id(id)?;
        if !request.has_primary_auth() {
            return Err(OidcError::unauthorized("primary authentication required"));
        }
        let signer = request
            .secondary_ext_jwt_signer
            .ok_or_else(|| OidcError::invalid_input("no external jwt signer is required"))?;

        let result = self.authorize(ctx).await?;
        let matches = result.success
            && result.identity_id == request.identity_id
            && result.ext_jwt_signer_id.as_deref() == Some(signer.id.as_str());
        if !matches {
            return Err(OidcError::InvalidAuth);
        }

        let mut request = self
            .auth_requests
            .get_mut(id)
            .ok_or_else(|| OidcError::not_found("auth request"))?;
        request.add_amr(secondary_ext_jwt_amr(&signer.id));
        Ok(request.clone())
    }

    /// Starts TOTP enrollment for the identity behind request `id`.
    pub async fn start_totp_enrollment(&self, id: &str) -> OidcResult<Mfa> {
        let identity_id = self.enrolling_identity(id)?;

        self.collaborators
            .mfa
            .create_for_identity(&identity_id)
            .await
            .map_err(|e| OidcError::collaborator("creating totp enrollment", e))?;

        self.read_mfa(&identity_id)
            .await?
            .ok_or_else(|| OidcError::internal("totp enrollment not readable after create"))
    }

    pub async fn complete_totp_enrollment(&self, id: &str, code: &str) -> OidcResult<()> {
        let identity_id = self.enrolling_identity(id)?;
        self.collaborators
            .mfa
            .complete_enrollment(&identity_id, code)
            .await
            .map_err(|e| OidcError::collaborator("completing totp enrollment", e))
    }

    /// Removes the identity's TOTP enrollment. A verified enrollment can only
    /// be removed with a valid code.
    pub async fn delete_totp_enrollment(&self, id: &str, code: &str) -> OidcResult<()> {
        let identity_id = self.enrolling_identity(id)?;
        let mfa = self
            .read_mfa(&identity_id)
            .await?
            .ok_or_else(|| OidcError::not_found("totp enrollment"))?;

        if mfa.is_verified {
            let verified = self
                .collaborators
                .mfa
                .verify(&mfa, code)
                .await
                .map_err(|e| OidcError::collaborator("verifying totp", e))?;
            if !verified {
                return Err(OidcError::InvalidMfaToken);
            }
        }

        self.collaborators
            .mfa
            .delete(&mfa.id)
            .await
            .map_err(|e| OidcError::collaborator("deleting totp enrollment", e))
    }

    fn enrolling_identity(&self, id: &str) -> OidcResult<String> {
        self.auth_requests
            .get(id)
            .map(|r| r.identity_id.clone())
            .ok_or_else(|| OidcError::unauthorized("auth request not found"))
    }

    async fn authorize(&self, ctx: &AuthContext) -> OidcResult<AuthResult> {
        self.collaborators
            .authenticator
            .authorize(ctx)
            .await
            .map_err(|e| OidcError::collaborator("authenticating", e))
    }

    async fn read_mfa(&self, identity_id: &str) -> OidcResult<Option<Mfa>> {
        self.collaborators
            .mfa
            .read_one_by_identity_id(identity_id)
            .await
            .map_err(|e| OidcError::collaborator("reading mfa", e))
    }
}
