//! Signing keys derived from X.509 certificates.
//!
//! The controller signs with the private key of its server certificate. Peer
//! controllers publish only their certificates, so they are represented as
//! verification-only [`PublicKey`]s. Both are identified by the hex SHA-1
//! fingerprint of the certificate DER.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use x509_parser::public_key::PublicKey as SpkiKey;

use super::jwt::JwtError;

const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";
const OID_CURVE_P384: &str = "1.3.132.0.34";

/// Hex SHA-1 of a certificate's DER encoding.
#[must_use]
pub fn cert_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha1::digest(der))
}

// ============================================================================
// Algorithms
// ============================================================================

/// Signing algorithms the engine can produce and verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256, used for any RSA key.
    RS256,
    /// ECDSA on P-256 with SHA-256.
    ES256,
    /// ECDSA on P-384 with SHA-384.
    ES384,
}

impl KeyAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
        }
    }

    /// JWK curve name for EC algorithms.
    #[must_use]
    pub fn curve(&self) -> Option<&'static str> {
        match self {
            Self::RS256 => None,
            Self::ES256 => Some("P-256"),
            Self::ES384 => Some("P-384"),
        }
    }

    fn coordinate_len(self) -> usize {
        match self {
            Self::RS256 => 0,
            Self::ES256 => 32,
            Self::ES384 => 48,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Returns the key with the given id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig").
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Public keys
// ============================================================================

#[derive(Clone)]
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// Verification-only key taken from a certificate.
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    algorithm: KeyAlgorithm,
    decoding_key: DecodingKey,
    data: PublicKeyData,
}

impl PublicKey {
    /// Builds a public key from a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::UnsupportedKey` for key types other than RSA, P-256
    /// and P-384, and `JwtError::InvalidKey` if the certificate does not parse.
    pub fn from_cert_der(der: &[u8]) -> Result<Self, JwtError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| JwtError::invalid_key(format!("invalid certificate: {e}")))?;
        let spki = cert.public_key();

        let parsed = spki
            .parsed()
            .map_err(|e| JwtError::invalid_key(format!("invalid public key: {e}")))?;

        let (algorithm, data) = match parsed {
            SpkiKey::RSA(rsa) => (
                KeyAlgorithm::RS256,
                PublicKeyData::Rsa {
                    n: strip_leading_zeros(rsa.modulus).to_vec(),
                    e: strip_leading_zeros(rsa.exponent).to_vec(),
                },
            ),
            SpkiKey::EC(point) => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|p| p.as_oid().ok())
                    .map(|oid| oid.to_id_string())
                    .unwrap_or_default();
                let algorithm = match curve.as_str() {
                    OID_CURVE_P256 => KeyAlgorithm::ES256,
                    OID_CURVE_P384 => KeyAlgorithm::ES384,
                    other => {
                        return Err(JwtError::unsupported_key(format!("EC curve {other}")));
                    }
                };
                let (x, y) = split_uncompressed_point(point.data(), algorithm.coordinate_len())?;
                (algorithm, PublicKeyData::Ec { x, y })
            }
            _ => {
                return Err(JwtError::unsupported_key(
                    spki.algorithm.algorithm.to_id_string(),
                ));
            }
        };

        let decoding_key = match &data {
            PublicKeyData::Rsa { n, e } => DecodingKey::from_rsa_raw_components(n, e),
            PublicKeyData::Ec { x, y } => DecodingKey::from_ec_components(
                &URL_SAFE_NO_PAD.encode(x),
                &URL_SAFE_NO_PAD.encode(y),
            )
            .map_err(|e| JwtError::invalid_key(e.to_string()))?,
        };

        Ok(Self {
            kid: cert_fingerprint(der),
            algorithm,
            decoding_key,
            data,
        })
    }

    /// Key id: the certificate fingerprint.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The algorithm tokens signed by this key use.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Key used to verify signatures.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let base = Jwk {
            kty: String::new(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        match &self.data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                ..base
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                crv: self.algorithm.curve().map(str::to_string),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
                ..base
            },
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    &bytes[start..]
}

fn split_uncompressed_point(point: &[u8], len: usize) -> Result<(Vec<u8>, Vec<u8>), JwtError> {
    if point.len() != 1 + 2 * len || point[0] != 0x04 {
        return Err(JwtError::invalid_key("EC point is not uncompressed"));
    }
    let (x, y) = point[1..].split_at(len);
    Ok((x.to_vec(), y.to_vec()))
}

// ============================================================================
// Signing key
// ============================================================================

/// The controller's own key: its server certificate plus private key.
#[derive(Clone)]
pub struct SigningKey {
    public: PublicKey,
    encoding_key: EncodingKey,
}

impl SigningKey {
    /// Loads a signing key from a DER certificate and a PEM private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is unsupported or the private key
    /// does not parse for the certificate's algorithm.
    pub fn from_cert_der(cert_der: &[u8], private_key_pem: &str) -> Result<Self, JwtError> {
        let public = PublicKey::from_cert_der(cert_der)?;
        let encoding_key = match public.algorithm {
            KeyAlgorithm::RS256 => EncodingKey::from_rsa_pem(private_key_pem.as_bytes()),
            KeyAlgorithm::ES256 | KeyAlgorithm::ES384 => {
                EncodingKey::from_ec_pem(private_key_pem.as_bytes())
            }
        }
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            public,
            encoding_key,
        })
    }

    /// Loads a signing key from a PEM certificate and a PEM private key.
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM block is invalid.
    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, JwtError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(format!("invalid certificate PEM: {e}")))?;
        Self::from_cert_der(&pem.contents, private_key_pem)
    }

    /// Key id: the certificate fingerprint.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.public.kid()
    }

    /// The signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.public.algorithm()
    }

    /// The verification half of this key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.public.kid)
            .field("algorithm", &self.public.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    const RSA_CERT: &str = include_str!("../../tests/fixtures/rsa.crt");
    const RSA_KEY: &str = include_str!("../../tests/fixtures/rsa.key");
    const P521_CERT: &str = include_str!("../../tests/fixtures/p521.crt");
    const P521_KEY: &str = include_str!("../../tests/fixtures/p521.key");

    #[test]
    fn test_p256_certificate_signs_es256() {
        let (der, pem) = test_support::ec_cert(&rcgen::PKCS_ECDSA_P256_SHA256, "ctrl1");
        let key = SigningKey::from_cert_der(&der, &pem).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::ES256);
        assert_eq!(key.kid(), cert_fingerprint(&der));
        assert_eq!(key.kid().len(), 40);
    }

    #[test]
    fn test_p384_certificate_signs_es384() {
        let (der, pem) = test_support::ec_cert(&rcgen::PKCS_ECDSA_P384_SHA384, "ctrl1");
        let key = SigningKey::from_cert_der(&der, &pem).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::ES384);

        let jwk = key.public_key().to_jwk();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-384"));
        assert_eq!(
            URL_SAFE_NO_PAD.decode(jwk.x.unwrap()).unwrap().len(),
            48
        );
        assert!(jwk.n.is_none());
    }

    #[test]
    fn test_rsa_certificate_signs_rs256() {
        let key = SigningKey::from_pem(RSA_CERT, RSA_KEY).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::RS256);

        let jwk = key.public_key().to_jwk();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        // 2048-bit modulus without the DER sign byte.
        let n = URL_SAFE_NO_PAD.decode(jwk.n.unwrap()).unwrap();
        assert_eq!(n.len(), 256);
        assert_ne!(n[0], 0);
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
    }

    #[test]
    fn test_p521_is_unsupported() {
        let err = SigningKey::from_pem(P521_CERT, P521_KEY).unwrap_err();
        assert!(matches!(err, JwtError::UnsupportedKey { .. }));
    }

    #[test]
    fn test_mismatched_private_key_type_rejected() {
        let (der, _) = test_support::ec_cert(&rcgen::PKCS_ECDSA_P256_SHA256, "ctrl1");
        let err = SigningKey::from_cert_der(&der, RSA_KEY).unwrap_err();
        assert!(err.is_key_error());
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        let err = PublicKey::from_cert_der(b"not a certificate").unwrap_err();
        assert!(matches!(err, JwtError::InvalidKey { .. }));
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 2]), &[1, 2]);
        assert_eq!(strip_leading_zeros(&[1, 0]), &[1, 0]);
        assert_eq!(strip_leading_zeros(&[0]), &[0]);
    }

    #[test]
    fn test_jwk_serializes_use_field() {
        let (der, _) = test_support::ec_cert(&rcgen::PKCS_ECDSA_P256_SHA256, "ctrl1");
        let public = PublicKey::from_cert_der(&der).unwrap();
        let json = serde_json::to_value(public.to_jwk()).unwrap();
        assert_eq!(json["use"], "sig");
        assert_eq!(json["crv"], "P-256");
        assert!(json.get("n").is_none());
    }
}
