//! Auth request registry and authorization codes.

use time::OffsetDateTime;

use crate::error::{OidcError, OidcResult};
use crate::oauth::{AuthRequest, AuthorizeParams, TransportInfo};
use crate::token::{EnvInfo, SdkInfo};

use super::StorageEngine;

impl StorageEngine {
    /// Starts a login.
    ///
    /// Peer certificates, bearer-token presence, the requested method and
    /// config types are captured from `transport` now and never re-read.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::LoginRequired` when silent authentication is
    /// requested.
    pub async fn create_auth_request(
        &self,
        params: AuthorizeParams,
        transport: &TransportInfo,
        identity_id: &str,
    ) -> OidcResult<AuthRequest> {
        if params.is_silent() {
            return Err(OidcError::LoginRequired);
        }

        let mut request = AuthRequest::new(params, OffsetDateTime::now_utc());
        request.identity_id = identity_id.to_string();
        request.remote_address = transport.remote_address.clone();
        request.peer_certs = transport.peer_certs.clone();
        request.bearer_token_detected = transport.has_bearer_token();
        request.requested_method = transport.query_value("method");

        let config_type_names = transport.query_values("configTypes");
        if !config_type_names.is_empty() {
            request.config_types = self
                .map_config_types(&config_type_names, identity_id)
                .await?;
        }

        tracing::debug!(
            id = %request.id,
            client_id = %request.params.client_id,
            method = %request.requested_method,
            peer_certs = request.peer_certs.len(),
            "auth request created"
        );

        self.auth_requests
            .insert(request.id.clone(), request.clone());
        Ok(request)
    }

    pub fn auth_request_by_id(&self, id: &str) -> OidcResult<AuthRequest> {
        self.auth_requests
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| OidcError::not_found("auth request"))
    }

    pub fn auth_request_by_code(&self, code: &str) -> OidcResult<AuthRequest> {
        let id = self
            .codes
            .get(code)
            .map(|id| id.value().clone())
            .ok_or_else(|| OidcError::not_found("auth code"))?;
        self.auth_request_by_id(&id)
    }

    /// Binds `code` to request `id`. Codes previously bound to the same
    /// request stop resolving.
    pub fn save_auth_code(&self, id: &str, code: &str) -> OidcResult<()> {
        self.codes.retain(|c, bound| bound.as_str() != id || c.as_str() == code);
        self.codes.insert(code.to_string(), id.to_string());
        Ok(())
    }

    /// Removes a request and every code bound to it.
    pub fn delete_auth_request(&self, id: &str) -> OidcResult<()> {
        self.auth_requests.remove(id);
        self.codes.retain(|_, bound| bound.as_str() != id);
        Ok(())
    }

    /// `Ok` once every required factor is satisfied.
    pub fn auth_request_done(&self, id: &str) -> OidcResult<()> {
        let request = self.auth_request_by_id(id)?;
        if request.has_full_auth() {
            Ok(())
        } else {
            Err(OidcError::unauthorized(
                "additional authentication interactions are required",
            ))
        }
    }

    /// Records the SDK and environment reported on login and forwards them
    /// to the identity store.
    pub async fn update_sdk_env_info(
        &self,
        id: &str,
        sdk_info: Option<SdkInfo>,
        env_info: Option<EnvInfo>,
    ) -> OidcResult<()> {
        let identity_id = {
            let mut request = self
                .auth_requests
                .get_mut(id)
                .ok_or_else(|| OidcError::not_found("auth request"))?;
            request.sdk_info = sdk_info.clone();
            request.env_info = env_info.clone();
            request.identity_id.clone()
        };

        let identity = self.read_identity(&identity_id).await?;
        self.collaborators
            .identities
            .update_sdk_env_info(&identity, sdk_info.as_ref(), env_info.as_ref())
            .await
            .map_err(|e| OidcError::collaborator("updating sdk info", e))
    }

    pub(super) async fn map_config_types(
        &self,
        names: &[String],
        identity_id: &str,
    ) -> OidcResult<Vec<String>> {
        self.collaborators
            .identities
            .map_config_types(names, identity_id)
            .await
            .map_err(|e| OidcError::collaborator("mapping config types", e))
    }
}
