//! Registered OIDC relying parties.
//!
//! The built-in native client is a public PKCE client used by Ziti SDKs and
//! tunnelers. Service clients authenticate with a shared secret and use the
//! client-credentials grant.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{AMR_CERT, AMR_EXT_JWT};
use crate::config::OidcConfig;
use crate::token::CLIENT_ID_OPENZITI;

const PASSWORD_LOGIN_PATH: &str = "/oidc/login/username?authRequestID=";
const CERT_LOGIN_PATH: &str = "/oidc/login/cert?authRequestID=";
const EXT_JWT_LOGIN_PATH: &str = "/oidc/login/ext-jwt?authRequestID=";

/// Resolves the login page URL for an auth request id and requested method.
pub type LoginUrlResolver = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    Native,
    Web,
    UserAgent,
}

/// How a client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Public client; PKCE only.
    None,
    ClientSecretBasic,
    ClientSecretPost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    IdToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:token-exchange")]
    TokenExchange,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
}

/// Whether access tokens are JWTs or opaque bearer strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenType {
    Jwt,
    Bearer,
}

/// An OIDC relying party.
#[derive(Clone)]
pub struct Client {
    pub id: String,
    /// Shared secret; `None` for public clients.
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub application_type: ApplicationType,
    pub auth_method: AuthMethod,
    pub response_types: Vec<ResponseType>,
    pub grant_types: Vec<GrantType>,
    pub access_token_type: AccessTokenType,
    pub id_token_lifetime: Duration,
    login_url: LoginUrlResolver,
}

impl Client {
    /// The built-in public PKCE client for SDKs and tunnelers.
    #[must_use]
    pub fn native(id: impl Into<String>, config: &OidcConfig) -> Self {
        Self {
            id: id.into(),
            secret: None,
            redirect_uris: config.redirect_uris.clone(),
            post_logout_redirect_uris: config.post_logout_uris.clone(),
            application_type: ApplicationType::Native,
            auth_method: AuthMethod::None,
            response_types: vec![ResponseType::Code],
            grant_types: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::TokenExchange,
                GrantType::DeviceCode,
            ],
            access_token_type: AccessTokenType::Jwt,
            id_token_lifetime: config.id_token_duration,
            login_url: Arc::new(native_login_url),
        }
    }

    /// The built-in native client under its canonical id.
    #[must_use]
    pub fn openziti(config: &OidcConfig) -> Self {
        Self::native(CLIENT_ID_OPENZITI, config)
    }

    /// A confidential client for the client-credentials grant.
    #[must_use]
    pub fn service(id: impl Into<String>, secret: impl Into<String>, config: &OidcConfig) -> Self {
        Self {
            id: id.into(),
            secret: Some(secret.into()),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            application_type: ApplicationType::Web,
            auth_method: AuthMethod::ClientSecretBasic,
            response_types: Vec::new(),
            grant_types: vec![GrantType::ClientCredentials],
            access_token_type: AccessTokenType::Jwt,
            id_token_lifetime: config.id_token_duration,
            login_url: Arc::new(|_: &str, _: &str| String::new()),
        }
    }

    /// Replaces the login URL resolver.
    #[must_use]
    pub fn with_login_url(mut self, resolver: LoginUrlResolver) -> Self {
        self.login_url = resolver;
        self
    }

    /// Login page for an auth request.
    #[must_use]
    pub fn login_url(&self, auth_request_id: &str, method: &str) -> String {
        (self.login_url)(auth_request_id, method)
    }

    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Checks a redirect URI against the registered list.
    ///
    /// A registered `:*` port matches any port on an otherwise identical URI.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|p| uri_matches(p, uri))
    }

    #[must_use]
    pub fn is_post_logout_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris
            .iter()
            .any(|p| uri_matches(p, uri))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("has_secret", &self.secret.is_some())
            .field("application_type", &self.application_type)
            .field("auth_method", &self.auth_method)
            .field("grant_types", &self.grant_types)
            .finish_non_exhaustive()
    }
}

fn native_login_url(auth_request_id: &str, method: &str) -> String {
    let path = match method {
        AMR_CERT => CERT_LOGIN_PATH,
        AMR_EXT_JWT => EXT_JWT_LOGIN_PATH,
        _ => PASSWORD_LOGIN_PATH,
    };
    format!("{path}{auth_request_id}")
}

fn uri_matches(pattern: &str, uri: &str) -> bool {
    if pattern == uri {
        return true;
    }
    if !pattern.contains(":*") {
        return false;
    }
    let (Ok(pattern), Ok(uri)) = (Url::parse(&pattern.replacen(":*", "", 1)), Url::parse(uri))
    else {
        return false;
    };
    pattern.scheme() == uri.scheme()
        && pattern.host_str() == uri.host_str()
        && pattern.path() == uri.path()
        && uri.query().is_none()
}
