//! Shared fixtures and collaborator mocks for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use rcgen::{CertificateParams, KeyPair, SignatureAlgorithm};

use crate::config::OidcConfig;
use crate::engine::{Collaborators, StorageEngine};
use crate::events::{ApiSessionEvent, ApiSessionEventSink};
use crate::oauth::{
    AMR_CERT, AMR_EXT_JWT, AMR_PASSWORD, AuthRequest, AuthorizeParams, ExternalJwtSigner,
    TransportInfo,
};
use crate::signing::SigningKey;
use crate::storage::{
    AuthContext, AuthResult, Authenticator, CertAuthInfo, CollaboratorResult, Identity,
    IdentityStore, InMemoryRevocationStore, Mfa, MfaStore, PeerSignerDirectory,
};
use crate::token::{EnvInfo, SdkInfo};

pub(crate) const ISSUER: &str = "https://localhost:1280/oidc";

/// The only TOTP code the mock MFA store accepts.
pub(crate) const TOTP_CODE: &str = "123456";

const PASSWORD: &str = "secret";

/// Self-signed certificate DER and PKCS#8 private key PEM.
pub(crate) fn ec_cert(alg: &'static SignatureAlgorithm, host: &str) -> (Vec<u8>, String) {
    let key_pair = KeyPair::generate_for(alg).unwrap();
    let cert = CertificateParams::new(vec![host.to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    (cert.der().to_vec(), key_pair.serialize_pem())
}

/// A fresh P-256 signing key.
pub(crate) fn signing_key() -> SigningKey {
    let (der, pem) = ec_cert(&rcgen::PKCS_ECDSA_P256_SHA256, "localhost");
    SigningKey::from_cert_der(&der, &pem).unwrap()
}

pub(crate) fn config() -> OidcConfig {
    OidcConfig {
        controller_id: "ctrl-test".to_string(),
        token_secret: Some("test-token-secret".to_string()),
        ..OidcConfig::default()
    }
}

pub(crate) fn authorize_params() -> AuthorizeParams {
    AuthorizeParams {
        client_id: "openziti".to_string(),
        redirect_uri: "openziti://auth/callback".to_string(),
        scopes: vec!["openid".to_string(), "offline_access".to_string()],
        state: "state-1".to_string(),
        response_type: "code".to_string(),
        ..AuthorizeParams::default()
    }
}

pub(crate) fn password_ctx(identity_id: &str) -> AuthContext {
    AuthContext::new(AMR_PASSWORD)
        .with_credential("username", identity_id)
        .with_credential("password", PASSWORD)
}

/// Creates an auth request and completes it with a password login.
pub(crate) async fn done_request(engine: &StorageEngine, identity_id: &str) -> AuthRequest {
    let request = engine
        .create_auth_request(authorize_params(), &TransportInfo::default(), "")
        .await
        .unwrap();
    engine
        .authenticate(&password_ctx(identity_id), &request.id, &[])
        .await
        .unwrap()
}

// ============================================================================
// Mocks
// ============================================================================

/// Accepts `password` logins with the fixed password, and any `cert` or
/// `ext-jwt` login naming a `username`.
#[derive(Default)]
pub(crate) struct MockAuthenticator {
    totp_required: RwLock<HashSet<String>>,
    ext_jwt_required: RwLock<HashMap<String, String>>,
}

impl MockAuthenticator {
    pub(crate) fn require_totp(&self, identity_id: &str) {
        self.totp_required
            .write()
            .unwrap()
            .insert(identity_id.to_string());
    }

    pub(crate) fn require_ext_jwt(&self, identity_id: &str, signer_id: &str) {
        self.ext_jwt_required
            .write()
            .unwrap()
            .insert(identity_id.to_string(), signer_id.to_string());
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authorize(&self, ctx: &AuthContext) -> CollaboratorResult<AuthResult> {
        let Some(username) = ctx.credential("username") else {
            return Ok(AuthResult::failed());
        };

        let mut result = AuthResult::succeeded(username);
        match ctx.method.as_str() {
            AMR_PASSWORD if ctx.credential("password") == Some(PASSWORD) => {}
            AMR_CERT => {
                result.cert = Some(CertAuthInfo {
                    is_issued_by_network: true,
                    ..CertAuthInfo::default()
                });
            }
            AMR_EXT_JWT => {
                result.ext_jwt_signer_id = ctx.credential("signer").map(str::to_string);
            }
            _ => return Ok(AuthResult::failed()),
        }

        result.authenticator_id = format!("auth-{username}");
        result.require_totp = self.totp_required.read().unwrap().contains(username);
        result.required_ext_jwt_signer = self
            .ext_jwt_required
            .read()
            .unwrap()
            .get(username)
            .cloned();
        Ok(result)
    }
}

/// Holds `identity-1` (an admin) and `identity-2`, plus signer `signer-1`.
pub(crate) struct MockIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
    signers: RwLock<HashMap<String, ExternalJwtSigner>>,
    sdk_updates: Mutex<Vec<String>>,
}

impl MockIdentityStore {
    fn new() -> Self {
        let identities = ["identity-1", "identity-2"]
            .into_iter()
            .map(|id| {
                let identity = Identity {
                    id: id.to_string(),
                    name: format!("Identity {id}"),
                    external_id: Some(format!("ext-{id}")),
                    is_admin: id == "identity-1",
                };
                (id.to_string(), identity)
            })
            .collect();

        let signer = ExternalJwtSigner {
            id: "signer-1".to_string(),
            name: "Signer One".to_string(),
            client_id: Some("ziti-client".to_string()),
            external_auth_url: Some("https://idp.example.com/auth".to_string()),
            scopes: vec!["openid".to_string()],
        };

        Self {
            identities: RwLock::new(identities),
            signers: RwLock::new(HashMap::from([(signer.id.clone(), signer)])),
            sdk_updates: Mutex::new(Vec::new()),
        }
    }

    /// Identity ids whose SDK info was recorded, in order.
    pub(crate) fn sdk_updates(&self) -> Vec<String> {
        self.sdk_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityStore for MockIdentityStore {
    async fn read(&self, id: &str) -> CollaboratorResult<Option<Identity>> {
        Ok(self.identities.read().unwrap().get(id).cloned())
    }

    async fn read_ext_jwt_signer(&self, id: &str) -> CollaboratorResult<Option<ExternalJwtSigner>> {
        Ok(self.signers.read().unwrap().get(id).cloned())
    }

    async fn map_config_types(
        &self,
        names: &[String],
        _identity_id: &str,
    ) -> CollaboratorResult<Vec<String>> {
        Ok(names.iter().map(|n| format!("id-{n}")).collect())
    }

    async fn update_sdk_env_info(
        &self,
        identity: &Identity,
        _sdk_info: Option<&SdkInfo>,
        _env_info: Option<&EnvInfo>,
    ) -> CollaboratorResult<()> {
        self.sdk_updates.lock().unwrap().push(identity.id.clone());
        Ok(())
    }
}

/// One enrollment per identity; only [`TOTP_CODE`] verifies.
#[derive(Default)]
pub(crate) struct MockMfaStore {
    enrollments: RwLock<HashMap<String, Mfa>>,
}

impl MockMfaStore {
    pub(crate) fn enroll(&self, identity_id: &str, verified: bool) {
        self.enrollments.write().unwrap().insert(
            identity_id.to_string(),
            Mfa {
                id: format!("mfa-{identity_id}"),
                identity_id: identity_id.to_string(),
                is_verified: verified,
            },
        );
    }
}

#[async_trait]
impl MfaStore for MockMfaStore {
    async fn read_one_by_identity_id(&self, identity_id: &str) -> CollaboratorResult<Option<Mfa>> {
        Ok(self.enrollments.read().unwrap().get(identity_id).cloned())
    }

    async fn verify(&self, _mfa: &Mfa, code: &str) -> CollaboratorResult<bool> {
        Ok(code == TOTP_CODE)
    }

    async fn create_for_identity(&self, identity_id: &str) -> CollaboratorResult<String> {
        self.enroll(identity_id, false);
        Ok(format!("mfa-{identity_id}"))
    }

    async fn complete_enrollment(&self, identity_id: &str, code: &str) -> CollaboratorResult<()> {
        let mut enrollments = self.enrollments.write().unwrap();
        let mfa = enrollments
            .get_mut(identity_id)
            .ok_or("no pending enrollment")?;
        if code != TOTP_CODE {
            return Err("invalid code".into());
        }
        mfa.is_verified = true;
        Ok(())
    }

    async fn delete(&self, id: &str) -> CollaboratorResult<()> {
        self.enrollments.write().unwrap().retain(|_, m| m.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockPeers {
    certs: Vec<Vec<u8>>,
}

#[async_trait]
impl PeerSignerDirectory for MockPeers {
    async fn peer_signers(&self) -> CollaboratorResult<Vec<Vec<u8>>> {
        Ok(self.certs.clone())
    }
}

/// Keeps every event it receives.
#[derive(Default)]
pub(crate) struct RecordingEventSink {
    events: Mutex<Vec<ApiSessionEvent>>,
}

impl RecordingEventSink {
    /// Drains the recorded events.
    pub(crate) fn take(&self) -> Vec<ApiSessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ApiSessionEventSink for RecordingEventSink {
    fn accept(&self, event: ApiSessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// The full set of collaborator mocks, kept so tests can inspect them.
pub(crate) struct Mocks {
    pub authenticator: Arc<MockAuthenticator>,
    pub identities: Arc<MockIdentityStore>,
    pub mfa: Arc<MockMfaStore>,
    pub revocations: Arc<InMemoryRevocationStore>,
    pub peers: Arc<MockPeers>,
    pub events: Arc<RecordingEventSink>,
}

impl Mocks {
    pub(crate) fn new() -> Self {
        Self {
            authenticator: Arc::new(MockAuthenticator::default()),
            identities: Arc::new(MockIdentityStore::new()),
            mfa: Arc::new(MockMfaStore::default()),
            revocations: Arc::new(InMemoryRevocationStore::new()),
            peers: Arc::new(MockPeers::default()),
            events: Arc::new(RecordingEventSink::default()),
        }
    }

    pub(crate) fn with_peer_certs(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.peers = Arc::new(MockPeers { certs });
        self
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.authenticator.clone(),
            self.identities.clone(),
            self.mfa.clone(),
            self.revocations.clone(),
        )
        .with_peers(self.peers.clone())
        .with_events(self.events.clone())
    }

    /// An engine over these mocks, without the background sweep.
    pub(crate) fn engine(&self) -> StorageEngine {
        StorageEngine::build(config(), signing_key(), self.collaborators()).unwrap()
    }
}
