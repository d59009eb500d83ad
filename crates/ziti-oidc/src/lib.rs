//! # ziti-oidc
//!
//! OIDC provider storage for the Ziti controller.
//!
//! This crate provides:
//! - The auth-request lifecycle: creation, primary and secondary
//!   authentication, authorization codes and abandonment
//! - Access, refresh and ID token issuance with single-use refresh rotation
//! - Revocation of tokens, signing keys and whole sessions
//! - A JWKS spanning this controller and its peers
//! - Client registries, device authorization and token exchange
//!
//! ## Overview
//!
//! [`StorageEngine`] is the storage backend an OIDC provider calls into. It
//! keeps login state in memory and delegates credential checks, identities,
//! MFA and durable revocations to the collaborator traits in [`storage`].
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration and defaults
//! - [`engine`] - The storage engine and its cleanup sweep
//! - [`error`] - Error types
//! - [`events`] - API-session lifecycle events
//! - [`issuer`] - Issuer URLs and address matching
//! - [`oauth`] - Auth requests, clients, device flow and token exchange
//! - [`signing`] - Signing keys, JWKS and JWT encoding
//! - [`storage`] - Collaborator traits
//! - [`token`] - Claims and token requests

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod issuer;
pub mod oauth;
pub mod signing;
pub mod storage;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, OidcConfig};
pub use engine::{
    Collaborators, IssuedAccessToken, IssuedTokens, StorageEngine, SweepStats, UserInfo,
};
pub use error::{BoxError, ErrorCategory, OidcError, OidcResult};
pub use events::{ApiSessionEvent, ApiSessionEventSink, ApiSessionEventType, TracingEventSink};
pub use issuer::{Issuer, IssuerError, IssuerSet};
pub use oauth::{AuthQuery, AuthRequest, AuthRequestState, AuthorizeParams, Client, TransportInfo};
pub use signing::{Jwk, Jwks, JwtError, KeyAlgorithm, PublicKey, SigningKey};
pub use storage::{
    AuthContext, AuthResult, Authenticator, IdentityStore, InMemoryRevocationStore, MfaStore,
    PeerSignerDirectory, RevocationStore,
};
pub use token::{AccessClaims, IdTokenClaims, RefreshClaims, TokenRequest, TokenType};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ziti_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, OidcConfig};
    pub use crate::engine::{
        Collaborators, IssuedAccessToken, IssuedTokens, StorageEngine, SweepStats, UserInfo,
    };
    pub use crate::error::{OidcError, OidcResult};
    pub use crate::events::{ApiSessionEvent, ApiSessionEventSink, ApiSessionEventType};
    pub use crate::oauth::{
        AuthRequest, AuthorizeParams, Client, DeviceAuthorizationState, TokenExchangeParams,
        TransportInfo,
    };
    pub use crate::signing::SigningKey;
    pub use crate::storage::{
        AuthContext, AuthResult, Authenticator, CollaboratorResult, Identity, IdentityStore, Mfa,
        MfaStore, PeerSignerDirectory, Revocation, RevocationStore,
    };
    pub use crate::token::{AccessClaims, RefreshClaims, TokenRequest};
}
