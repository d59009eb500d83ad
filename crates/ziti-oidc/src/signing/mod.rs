//! Token signing keys and JWT encoding.
//!
//! - [`key`] - Certificate-derived signing and verification keys, JWKS types
//! - [`jwt`] - Encoding, header inspection and verification

pub mod jwt;
pub mod key;

pub use jwt::{JwtError, decode_claims, encode_claims, header_kid};
pub use key::{Jwk, Jwks, KeyAlgorithm, PublicKey, SigningKey, cert_fingerprint};
