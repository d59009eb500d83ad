//! Local signing key, peer verification keys and the JWKS.

use crate::error::{OidcError, OidcResult};
use crate::signing::{JwtError, Jwks, KeyAlgorithm, PublicKey, SigningKey, cert_fingerprint};

use super::StorageEngine;

impl StorageEngine {
    /// The key every token from this controller is signed with.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    #[must_use]
    pub fn signature_algorithms(&self) -> Vec<KeyAlgorithm> {
        vec![self.signing_key.algorithm()]
    }

    /// Pulls peer signing certificates and caches any key not seen before.
    ///
    /// Certificates whose key cannot be used for verification are logged and
    /// skipped.
    pub async fn refresh_peer_keys(&self) -> OidcResult<()> {
        let signers = self
            .collaborators
            .peers
            .peer_signers()
            .await
            .map_err(|e| OidcError::collaborator("reading peer signers", e))?;

        for der in signers {
            let kid = cert_fingerprint(&der);
            if self.peer_keys.contains_key(&kid) {
                continue;
            }

            match PublicKey::from_cert_der(&der) {
                Ok(key) => {
                    tracing::debug!(kid = %kid, algorithm = %key.algorithm(), "cached peer signing key");
                    self.peer_keys.insert(kid, key);
                }
                Err(e) => log_unusable_peer(&der, &kid, &e),
            }
        }

        Ok(())
    }

    /// Keys tokens may be verified with: the local key unless its kid is
    /// revoked, then every cached peer key that is not revoked.
    pub async fn key_set(&self) -> OidcResult<Vec<PublicKey>> {
        self.refresh_peer_keys().await?;

        let mut keys = Vec::with_capacity(self.peer_keys.len() + 1);

        let local = self.signing_key.public_key();
        if !self.is_token_revoked(local.kid()).await? {
            keys.push(local.clone());
        }

        let peers: Vec<PublicKey> = self.peer_keys.iter().map(|e| e.value().clone()).collect();
        for key in peers {
            if !self.is_token_revoked(key.kid()).await? {
                keys.push(key);
            }
        }

        Ok(keys)
    }

    pub async fn jwks(&self) -> OidcResult<Jwks> {
        Ok(Jwks {
            keys: self.key_set().await?.iter().map(PublicKey::to_jwk).collect(),
        })
    }

    /// A known verification key by kid, local or peer.
    #[must_use]
    pub fn key_by_id(&self, kid: &str) -> Option<PublicKey> {
        if kid == self.signing_key.kid() {
            return Some(self.signing_key.public_key().clone());
        }
        self.peer_keys.get(kid).map(|k| k.value().clone())
    }

    /// The key to verify a token whose header names `kid`.
    ///
    /// Unknown kids trigger one peer refresh before failing.
    pub(super) async fn verification_key(&self, kid: &str) -> OidcResult<PublicKey> {
        if self.is_token_revoked(kid).await? {
            return Err(OidcError::invalid_token("signing key is revoked"));
        }

        if let Some(key) = self.key_by_id(kid) {
            return Ok(key);
        }

        self.refresh_peer_keys().await?;
        self.key_by_id(kid)
            .ok_or_else(|| JwtError::key_not_found(kid).into())
    }
}

fn log_unusable_peer(der: &[u8], kid: &str, err: &JwtError) {
    let (issuer, subject, key_type) = match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => (
            cert.issuer().to_string(),
            cert.subject().to_string(),
            cert.public_key().algorithm.algorithm.to_id_string(),
        ),
        Err(_) => (String::new(), String::new(), String::new()),
    };

    tracing::error!(
        issuer = %issuer,
        subject = %subject,
        kid = %kid,
        public_key_type = %key_type,
        error = %err,
        "unable to use peer signing certificate"
    );
}
