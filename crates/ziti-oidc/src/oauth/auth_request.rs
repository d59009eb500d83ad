//! Per-login state.
//!
//! An [`AuthRequest`] is created when an authorization flow starts and
//! accumulates authentication method references (AMR) as factors are
//! verified. It is complete once a primary factor and every required
//! secondary factor are present.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{AMR_CERT, AMR_EXT_JWT, AMR_PASSWORD, AMR_SECONDARY_EXT_JWT, AMR_TOTP};
use crate::signing::cert_fingerprint;
use crate::token::{EnvInfo, SdkInfo};

/// Path the TOTP form posts to, relative to the login page.
pub const TOTP_LOGIN_PATH: &str = "./oidc/login/totp";

/// Protocol fields of the incoming authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: String,
    pub nonce: String,
    pub response_type: String,
    pub response_mode: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub prompt: Vec<String>,
}

impl AuthorizeParams {
    /// Silent authentication: the prompt list is exactly `["none"]`.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.prompt.len() == 1 && self.prompt[0] == "none"
    }
}

/// Transport-level details captured when an auth request is created.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    /// DER-encoded TLS peer certificates, leaf first.
    pub peer_certs: Vec<Vec<u8>>,
    /// Request headers as received.
    pub headers: Vec<(String, String)>,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Remote `ip:port` of the caller.
    pub remote_address: String,
}

impl TransportInfo {
    /// All values of a header, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a query parameter.
    #[must_use]
    pub fn query_values(&self, name: &str) -> Vec<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    /// The first value of a query parameter, or empty.
    #[must_use]
    pub fn query_value(&self, name: &str) -> String {
        self.query_values(name).into_iter().next().unwrap_or_default()
    }

    /// Whether an `authorize` or `authorization` header carries a bearer token.
    #[must_use]
    pub fn has_bearer_token(&self) -> bool {
        self.header_values("authorize")
            .chain(self.header_values("authorization"))
            .any(|v| v.starts_with("Bearer "))
    }
}

/// An external JWT signer that must vouch for the identity as a secondary factor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalJwtSigner {
    pub id: String,
    pub name: String,
    pub client_id: Option<String>,
    pub external_auth_url: Option<String>,
    pub scopes: Vec<String>,
}

/// An outstanding secondary factor the client must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typeId")]
pub enum AuthQuery {
    /// A numeric TOTP code.
    #[serde(rename = "TOTP", rename_all = "camelCase")]
    Totp {
        provider: String,
        format: String,
        http_method: String,
        http_url: String,
        min_length: u32,
        max_length: u32,
    },
    /// A token from an external JWT signer.
    #[serde(rename = "EXT-JWT", rename_all = "camelCase")]
    ExtJwt {
        id: String,
        provider: String,
        client_id: String,
        http_url: String,
        scopes: Vec<String>,
    },
}

/// Where an auth request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRequestState {
    /// No method requested and nothing verified.
    Created,
    /// A primary method was requested but has not verified.
    PrimaryPending,
    /// Primary auth succeeded; required secondary factors are all outstanding.
    PrimaryComplete,
    /// Some, but not all, required secondary factors are satisfied.
    SecondaryPending,
    /// Every required factor is satisfied.
    Done,
}

/// One in-progress or completed login.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub params: AuthorizeParams,
    pub requested_method: String,
    amr: HashSet<String>,
    pub identity_id: String,
    pub api_session_id: String,
    pub auth_time: Option<OffsetDateTime>,
    pub authenticator_id: String,
    pub secondary_totp_required: bool,
    pub is_totp_enrolled: bool,
    pub secondary_ext_jwt_signer: Option<ExternalJwtSigner>,
    pub peer_certs: Vec<Vec<u8>>,
    pub bearer_token_detected: bool,
    pub config_types: Vec<String>,
    pub sdk_info: Option<SdkInfo>,
    pub env_info: Option<EnvInfo>,
    pub remote_address: String,
    pub is_cert_extendable: bool,
    pub is_cert_extend_requested: bool,
    pub is_cert_key_roll_requested: bool,
    pub improper_client_cert_chain: bool,
}

impl AuthRequest {
    /// A new request with a fresh id and API-session id.
    #[must_use]
    pub fn new(params: AuthorizeParams, created_at: OffsetDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at,
            params,
            requested_method: String::new(),
            amr: HashSet::new(),
            identity_id: String::new(),
            api_session_id: uuid::Uuid::new_v4().to_string(),
            auth_time: None,
            authenticator_id: String::new(),
            secondary_totp_required: false,
            is_totp_enrolled: false,
            secondary_ext_jwt_signer: None,
            peer_certs: Vec::new(),
            bearer_token_detected: false,
            config_types: Vec::new(),
            sdk_info: None,
            env_info: None,
            remote_address: String::new(),
            is_cert_extendable: false,
            is_cert_extend_requested: false,
            is_cert_key_roll_requested: false,
            improper_client_cert_chain: false,
        }
    }

    /// Satisfied authentication methods, sorted.
    #[must_use]
    pub fn amr(&self) -> Vec<String> {
        let mut amr: Vec<String> = self.amr.iter().cloned().collect();
        amr.sort();
        amr
    }

    /// Returns `true` if `amr` has been satisfied.
    #[must_use]
    pub fn has_amr(&self, amr: &str) -> bool {
        self.amr.contains(amr)
    }

    /// Records a satisfied method. The set only grows.
    pub fn add_amr(&mut self, amr: impl Into<String>) {
        self.amr.insert(amr.into());
    }

    /// Returns `true` once any factor has been recorded.
    #[must_use]
    pub fn has_any_amr(&self) -> bool {
        !self.amr.is_empty()
    }

    fn has_amr_ext_jwt(&self, signer_id: &str) -> bool {
        self.has_amr(&secondary_ext_jwt_amr(signer_id))
    }

    /// A certificate, password or external JWT has verified.
    #[must_use]
    pub fn has_primary_auth(&self) -> bool {
        self.has_amr(AMR_CERT) || self.has_amr(AMR_PASSWORD) || self.has_amr(AMR_EXT_JWT)
    }

    /// Every required secondary factor is present.
    #[must_use]
    pub fn has_secondary_auth(&self) -> bool {
        !self.needs_totp() && !self.needs_secondary_ext_jwt()
    }

    #[must_use]
    pub fn has_full_auth(&self) -> bool {
        self.has_primary_auth() && self.has_secondary_auth()
    }

    /// Tokens may be issued for this request.
    #[must_use]
    pub fn done(&self) -> bool {
        self.has_full_auth()
    }

    #[must_use]
    pub fn needs_totp(&self) -> bool {
        self.secondary_totp_required && !self.has_amr(AMR_TOTP)
    }

    #[must_use]
    pub fn needs_secondary_ext_jwt(&self) -> bool {
        self.secondary_ext_jwt_signer
            .as_ref()
            .is_some_and(|s| !self.has_amr_ext_jwt(&s.id))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AuthRequestState {
        if !self.has_primary_auth() {
            return if self.requested_method.is_empty() {
                AuthRequestState::Created
            } else {
                AuthRequestState::PrimaryPending
            };
        }
        if self.done() {
            return AuthRequestState::Done;
        }
        let totp_met = self.secondary_totp_required && self.has_amr(AMR_TOTP);
        let ext_met = self
            .secondary_ext_jwt_signer
            .as_ref()
            .is_some_and(|s| self.has_amr_ext_jwt(&s.id));
        if totp_met || ext_met {
            AuthRequestState::SecondaryPending
        } else {
            AuthRequestState::PrimaryComplete
        }
    }

    /// Outstanding secondary factors, for the login UI.
    #[must_use]
    pub fn auth_queries(&self) -> Vec<AuthQuery> {
        let mut queries = Vec::new();

        if self.needs_totp() {
            queries.push(AuthQuery::Totp {
                provider: "ziti".to_string(),
                format: "numeric".to_string(),
                http_method: "POST".to_string(),
                http_url: TOTP_LOGIN_PATH.to_string(),
                min_length: 6,
                max_length: 8,
            });
        }

        if let Some(signer) = self
            .secondary_ext_jwt_signer
            .as_ref()
            .filter(|_| self.needs_secondary_ext_jwt())
        {
            queries.push(AuthQuery::ExtJwt {
                id: signer.id.clone(),
                provider: "url".to_string(),
                client_id: signer.client_id.clone().unwrap_or_default(),
                http_url: signer.external_auth_url.clone().unwrap_or_default(),
                scopes: signer.scopes.clone(),
            });
        }

        queries
    }

    /// Hex SHA-1 fingerprints of the captured peer certificates.
    #[must_use]
    pub fn cert_fingerprints(&self) -> Vec<String> {
        self.peer_certs.iter().map(|c| cert_fingerprint(c)).collect()
    }
}

/// AMR recorded when the external JWT signer `signer_id` verifies as a secondary factor.
#[must_use]
pub fn secondary_ext_jwt_amr(signer_id: &str) -> String {
    format!("{AMR_SECONDARY_EXT_JWT}:{signer_id}")
}
