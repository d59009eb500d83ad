//! The OIDC storage engine.
//!
//! [`StorageEngine`] owns every in-memory registry the provider needs (auth
//! requests, codes, clients, device codes, peer keys) and implements the
//! provider-facing operations on top of the collaborator traits in
//! [`crate::storage`].
//!
//! Registries are `DashMap`s: reads and writes are atomic per key, with no
//! cross-key transactions. Guards are never held across an `.await`.
//!
//! # Usage
//!
//! ```ignore
//! use ziti_oidc::prelude::*;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let engine = StorageEngine::new(config, signing_key, collaborators, shutdown_rx)?;
//!
//! let request = engine.create_auth_request(params, transport, "").await?;
//! engine.authenticate(&AuthContext::new("password"), &request.id, &[]).await?;
//! let tokens = engine
//!     .create_access_and_refresh_tokens(&issuer, &engine.auth_request_by_id(&request.id)?, None)
//!     .await?;
//!
//! shutdown_tx.send(true)?;
//! ```

mod auth_requests;
mod authenticate;
mod cleanup;
mod clients;
mod device;
mod keys;
mod tokens;
mod userinfo;

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::config::OidcConfig;
use crate::error::{OidcError, OidcResult};
use crate::events::{ApiSessionEventSink, TracingEventSink};
use crate::issuer::IssuerSet;
use crate::oauth::device::DeviceAuthorizationEntry;
use crate::oauth::{AuthRequest, Client};
use crate::signing::{PublicKey, SigningKey};
use crate::storage::{
    Authenticator, Identity, IdentityStore, MfaStore, NoPeers, PeerSignerDirectory, Revocation,
    RevocationStore,
};
use crate::token::{CLIENT_ID_NATIVE_LEGACY, CLIENT_ID_OPENZITI, CustomClaims};

pub use cleanup::SweepStats;
pub use tokens::{
    IssuedAccessToken, IssuedTokens, SCOPE_API_SESSION_PREFIX, SCOPE_TOKEN_ID_PREFIX,
    boundary_scopes,
};
pub use userinfo::UserInfo;

/// External services the engine delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub authenticator: Arc<dyn Authenticator>,
    pub identities: Arc<dyn IdentityStore>,
    pub mfa: Arc<dyn MfaStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub peers: Arc<dyn PeerSignerDirectory>,
    pub events: Arc<dyn ApiSessionEventSink>,
}

impl Collaborators {
    /// Collaborators with no peer controllers and events logged via `tracing`.
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        identities: Arc<dyn IdentityStore>,
        mfa: Arc<dyn MfaStore>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        Self {
            authenticator,
            identities,
            mfa,
            revocations,
            peers: Arc::new(NoPeers),
            events: Arc::new(TracingEventSink),
        }
    }

    #[must_use]
    pub fn with_peers(mut self, peers: Arc<dyn PeerSignerDirectory>) -> Self {
        self.peers = peers;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn ApiSessionEventSink>) -> Self {
        self.events = events;
        self
    }
}

/// Claims of an issued access token, kept until it expires.
#[derive(Debug, Clone)]
pub(crate) struct RememberedClaims {
    pub subject: String,
    pub custom: CustomClaims,
    pub expires_at: OffsetDateTime,
}

/// The OIDC storage engine.
pub struct StorageEngine {
    config: OidcConfig,
    issuers: IssuerSet,
    signing_key: SigningKey,
    collaborators: Collaborators,

    auth_requests: DashMap<String, AuthRequest>,
    /// Authorization code -> auth request id.
    codes: DashMap<String, String>,
    clients: DashMap<String, Client>,
    service_clients: DashMap<String, Client>,
    /// Device code -> entry.
    device_codes: DashMap<String, DeviceAuthorizationEntry>,
    /// User code -> device code.
    user_codes: DashMap<String, String>,
    /// Peer controller keys by kid.
    peer_keys: DashMap<String, PublicKey>,
    /// Access token jti -> claims.
    issued_claims: DashMap<String, RememberedClaims>,
    /// Refresh token jti -> expiry, for tokens already rotated by this process.
    consumed_refresh: DashMap<String, OffsetDateTime>,
}

impl StorageEngine {
    /// Builds the engine and starts its cleanup sweep.
    ///
    /// The sweep runs every `cleanup_interval` until `shutdown` turns `true`
    /// or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::Configuration` if the configuration is invalid
    /// (including a missing token secret) or no Tokio runtime is running.
    pub fn new(
        config: OidcConfig,
        signing_key: SigningKey,
        collaborators: Collaborators,
        shutdown: watch::Receiver<bool>,
    ) -> OidcResult<Arc<Self>> {
        let engine = Arc::new(Self::build(config, signing_key, collaborators)?);
        engine.spawn_cleanup(shutdown)?;
        Ok(engine)
    }

    /// Builds the engine without starting the sweep.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::Configuration` if the configuration is invalid.
    pub fn build(
        config: OidcConfig,
        signing_key: SigningKey,
        collaborators: Collaborators,
    ) -> OidcResult<Self> {
        config
            .validate()
            .map_err(|e| OidcError::configuration(e.to_string()))?;
        let issuers = IssuerSet::new(
            config
                .parsed_issuers()
                .map_err(|e| OidcError::configuration(e.to_string()))?,
        );

        let engine = Self {
            issuers,
            signing_key,
            collaborators,
            auth_requests: DashMap::new(),
            codes: DashMap::new(),
            clients: DashMap::new(),
            service_clients: DashMap::new(),
            device_codes: DashMap::new(),
            user_codes: DashMap::new(),
            peer_keys: DashMap::new(),
            issued_claims: DashMap::new(),
            consumed_refresh: DashMap::new(),
            config,
        };

        engine.add_client(Client::native(CLIENT_ID_OPENZITI, &engine.config));
        engine.add_client(Client::native(CLIENT_ID_NATIVE_LEGACY, &engine.config));

        tracing::debug!(
            kid = %engine.signing_key.kid(),
            algorithm = %engine.signing_key.algorithm(),
            issuers = engine.issuers.issuers().len(),
            "oidc storage engine created"
        );

        Ok(engine)
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub fn issuers(&self) -> &IssuerSet {
        &self.issuers
    }

    /// The issuer URL for a request received on `addr`.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::InvalidInput` if `addr` is not bound to any issuer.
    pub fn issuer_for(&self, addr: &str) -> OidcResult<String> {
        self.issuers
            .select(addr)
            .map(|i| i.url())
            .ok_or_else(|| OidcError::invalid_input(format!("{addr} is not a configured issuer")))
    }

    /// Reads an identity that must exist.
    async fn read_identity(&self, id: &str) -> OidcResult<Identity> {
        self.collaborators
            .identities
            .read(id)
            .await
            .map_err(|e| OidcError::collaborator("reading identity", e))?
            .ok_or_else(|| OidcError::not_found(format!("identity {id}")))
    }

    async fn read_revocation(&self, id: &str) -> OidcResult<Option<Revocation>> {
        self.collaborators
            .revocations
            .read(id)
            .await
            .map_err(|e| OidcError::collaborator("reading revocation", e))
    }

    async fn save_revocation(&self, revocation: Revocation) -> OidcResult<()> {
        self.collaborators
            .revocations
            .create(revocation)
            .await
            .map_err(|e| OidcError::collaborator("saving revocation", e))
    }
}

/// Converts a configured lifetime to a claim offset.
fn lifetime(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
