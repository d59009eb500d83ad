//! Client registry and the client-credentials grant.

use subtle::ConstantTimeEq;

use crate::error::{OidcError, OidcResult};
use crate::oauth::Client;
use crate::token::{ClientCredentialsRequest, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID};

use super::StorageEngine;

impl StorageEngine {
    /// Registers or replaces a client.
    pub fn add_client(&self, client: Client) {
        tracing::debug!(client_id = %client.id, "registered oidc client");
        self.clients.insert(client.id.clone(), client);
    }

    /// Registers a confidential client for the client-credentials grant.
    pub fn add_service_client(&self, id: impl Into<String>, secret: impl Into<String>) {
        let client = Client::service(id, secret, &self.config);
        tracing::debug!(client_id = %client.id, "registered service client");
        self.service_clients.insert(client.id.clone(), client);
    }

    /// Looks up a registered client, then a service client.
    pub fn client_by_id(&self, id: &str) -> OidcResult<Client> {
        if let Some(client) = self.clients.get(id) {
            return Ok(client.value().clone());
        }
        self.service_clients
            .get(id)
            .map(|c| c.value().clone())
            .ok_or_else(|| OidcError::not_found(format!("client {id}")))
    }

    /// Checks a client's shared secret.
    pub fn authorize_client_secret(&self, id: &str, secret: &str) -> OidcResult<()> {
        let client = self
            .client_by_id(id)
            .map_err(|_| OidcError::invalid_client("client not found"))?;

        if secret_matches(client.secret.as_deref(), secret) {
            Ok(())
        } else {
            Err(OidcError::invalid_client("invalid secret"))
        }
    }

    /// Authenticates a service client by id and secret.
    pub fn client_credentials(&self, id: &str, secret: &str) -> OidcResult<Client> {
        let client = self
            .service_clients
            .get(id)
            .map(|c| c.value().clone())
            .filter(|c| secret_matches(c.secret.as_deref(), secret));

        client.ok_or_else(|| {
            tracing::debug!(client_id = %id, "client credentials rejected");
            OidcError::invalid_client("wrong service user or password")
        })
    }

    /// The token request for a service client that already authenticated.
    pub fn client_credentials_token_request(
        &self,
        id: &str,
        scopes: &[String],
    ) -> OidcResult<ClientCredentialsRequest> {
        if !self.service_clients.contains_key(id) {
            return Err(OidcError::invalid_client("wrong service user or password"));
        }
        Ok(ClientCredentialsRequest {
            client_id: id.to_string(),
            scopes: scopes.to_vec(),
        })
    }

    /// Keeps only `openid` and `offline_access`.
    #[must_use]
    pub fn validate_jwt_profile_scopes(&self, scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .filter(|s| *s == SCOPE_OPENID || *s == SCOPE_OFFLINE_ACCESS)
            .cloned()
            .collect()
    }

    /// Always healthy; the engine holds no external connections of its own.
    pub fn health(&self) -> OidcResult<()> {
        Ok(())
    }
}

fn secret_matches(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) => bool::from(expected.as_bytes().ct_eq(presented.as_bytes())),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Mocks;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches(Some("abc"), "abc"));
        assert!(!secret_matches(Some("abc"), "abd"));
        assert!(!secret_matches(Some("abc"), "ab"));
        assert!(!secret_matches(None, ""));
    }

    #[test]
    fn test_authorize_client_secret() {
        let engine = Mocks::new().engine();
        engine.add_service_client("svc", "s3cr3t");

        assert!(engine.authorize_client_secret("svc", "s3cr3t").is_ok());
        assert!(matches!(
            engine.authorize_client_secret("svc", "nope"),
            Err(OidcError::InvalidClient { .. })
        ));
        assert!(engine.authorize_client_secret("missing", "s3cr3t").is_err());
        // Public clients have no secret to match.
        assert!(engine.authorize_client_secret("openziti", "").is_err());
    }

    #[test]
    fn test_client_credentials() {
        let engine = Mocks::new().engine();
        engine.add_service_client("svc", "s3cr3t");

        let client = engine.client_credentials("svc", "s3cr3t").unwrap();
        assert_eq!(client.id, "svc");

        let err = engine.client_credentials("svc", "wrong").unwrap_err();
        assert!(err.to_string().contains("wrong service user or password"));
        assert!(engine.client_credentials("openziti", "").is_err());

        let request = engine
            .client_credentials_token_request("svc", &["openid".to_string()])
            .unwrap();
        assert_eq!(request.client_id, "svc");
        assert_eq!(request.scopes, vec!["openid"]);
        assert!(engine.client_credentials_token_request("nope", &[]).is_err());
    }

    #[test]
    fn test_validate_jwt_profile_scopes() {
        let engine = Mocks::new().engine();
        let scopes = vec![
            "openid".to_string(),
            "email".to_string(),
            "offline_access".to_string(),
        ];
        assert_eq!(
            engine.validate_jwt_profile_scopes(&scopes),
            vec!["openid", "offline_access"]
        );
        assert!(engine.health().is_ok());
    }
}
