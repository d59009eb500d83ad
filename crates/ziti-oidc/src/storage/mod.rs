//! Collaborator contracts for the OIDC engine.
//!
//! The engine never verifies credentials or persists identities itself. It
//! delegates to these traits:
//!
//! - [`Authenticator`] - verifies password, certificate and external JWT credentials
//! - [`IdentityStore`] - identities, external JWT signers and config types
//! - [`MfaStore`] - TOTP enrollment and verification
//! - [`RevocationStore`] - durable, cluster-replicated revocations
//! - [`PeerSignerDirectory`] - signing certificates of peer controllers
//!
//! Errors returned by collaborators are passed through to callers unchanged.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::BoxError;
use crate::oauth::ExternalJwtSigner;
use crate::token::{EnvInfo, SdkInfo};

pub use memory::InMemoryRevocationStore;

/// Result type returned by collaborators.
pub type CollaboratorResult<T> = Result<T, BoxError>;

// ============================================================================
// Authentication
// ============================================================================

/// Credentials presented for one authentication attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// AMR of the method being attempted (`password`, `cert`, `ext-jwt`).
    pub method: String,
    /// Method-specific values such as `username`, `password` or `token`.
    pub credentials: HashMap<String, String>,
    /// DER-encoded TLS peer certificates, leaf first.
    pub certs: Vec<Vec<u8>>,
}

impl AuthContext {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_certs(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.certs = certs;
        self
    }

    #[must_use]
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

/// Certificate authenticator details reported on cert logins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertAuthInfo {
    pub is_issued_by_network: bool,
    pub is_extend_requested: bool,
    pub is_key_roll_requested: bool,
}

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub identity_id: String,
    pub authenticator_id: String,
    /// Auth policy demands TOTP regardless of enrollment.
    pub require_totp: bool,
    /// Auth policy demands a token from this external JWT signer.
    pub required_ext_jwt_signer: Option<String>,
    pub cert: Option<CertAuthInfo>,
    pub improper_client_cert_chain: bool,
    /// Signer that verified an external JWT credential.
    pub ext_jwt_signer_id: Option<String>,
}

impl AuthResult {
    /// A failed attempt.
    #[must_use]
    pub fn failed() -> Self {
        Self::default()
    }

    /// A successful attempt for `identity_id`.
    #[must_use]
    pub fn succeeded(identity_id: impl Into<String>) -> Self {
        Self {
            success: true,
            identity_id: identity_id.into(),
            ..Self::default()
        }
    }
}

/// Verifies credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verifies the credentials in `ctx`.
    ///
    /// An unsuccessful [`AuthResult`] means the credentials were rejected; an
    /// `Err` means the check itself could not be performed.
    async fn authorize(&self, ctx: &AuthContext) -> CollaboratorResult<AuthResult>;
}

// ============================================================================
// Identities
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub is_admin: bool,
}

/// Read access to identities and related configuration.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Reads an identity; `Ok(None)` if it does not exist.
    async fn read(&self, id: &str) -> CollaboratorResult<Option<Identity>>;

    async fn read_ext_jwt_signer(&self, id: &str) -> CollaboratorResult<Option<ExternalJwtSigner>>;

    /// Maps config-type names to ids for `identity_id`.
    async fn map_config_types(
        &self,
        names: &[String],
        _identity_id: &str,
    ) -> CollaboratorResult<Vec<String>> {
        Ok(names.to_vec())
    }

    /// Records the SDK and environment an identity last connected with.
    async fn update_sdk_env_info(
        &self,
        _identity: &Identity,
        _sdk_info: Option<&SdkInfo>,
        _env_info: Option<&EnvInfo>,
    ) -> CollaboratorResult<()> {
        Ok(())
    }
}

// ============================================================================
// MFA
// ============================================================================

/// A TOTP enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mfa {
    pub id: String,
    pub identity_id: String,
    pub is_verified: bool,
}

/// TOTP enrollment and verification.
#[async_trait]
pub trait MfaStore: Send + Sync {
    /// The identity's enrollment, if any.
    async fn read_one_by_identity_id(&self, identity_id: &str) -> CollaboratorResult<Option<Mfa>>;

    /// Checks a TOTP or recovery code.
    async fn verify(&self, mfa: &Mfa, code: &str) -> CollaboratorResult<bool>;

    /// Starts an unverified enrollment and returns its id.
    async fn create_for_identity(&self, identity_id: &str) -> CollaboratorResult<String>;

    /// Verifies the first code of a pending enrollment.
    async fn complete_enrollment(&self, identity_id: &str, code: &str) -> CollaboratorResult<()>;

    async fn delete(&self, id: &str) -> CollaboratorResult<()>;
}

// ============================================================================
// Revocations
// ============================================================================

/// A revoked token id, signing key id, or `identityId,clientId` session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub id: String,
    /// The record may be pruned after this instant.
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl Revocation {
    #[must_use]
    pub fn new(id: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            expires_at,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Durable store of revocations, shared by every controller.
///
/// Creating an existing id must succeed.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn create(&self, revocation: Revocation) -> CollaboratorResult<()>;

    async fn read(&self, id: &str) -> CollaboratorResult<Option<Revocation>>;
}

// ============================================================================
// Peer signers
// ============================================================================

/// Discovers the signing certificates of peer controllers.
#[async_trait]
pub trait PeerSignerDirectory: Send + Sync {
    /// DER-encoded signing certificates of every known peer.
    async fn peer_signers(&self) -> CollaboratorResult<Vec<Vec<u8>>>;
}

/// A directory with no peers, for single-controller deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

#[async_trait]
impl PeerSignerDirectory for NoPeers {
    async fn peer_signers(&self) -> CollaboratorResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}
