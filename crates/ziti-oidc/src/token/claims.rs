//! Claims carried by access, refresh and ID tokens.
//!
//! Each token type flattens the standard OIDC claims and the Ziti custom
//! claims into a single JSON object.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};

/// Client id and audience of tokens issued for Ziti.
pub const CLIENT_ID_OPENZITI: &str = "openziti";

/// Audience every Ziti token carries.
pub const AUDIENCE_OPENZITI: &str = CLIENT_ID_OPENZITI;

/// Legacy native client id, still accepted as an audience.
pub const CLIENT_ID_NATIVE_LEGACY: &str = "native";

/// Serialized JWTs start with this prefix (base64url of `{"`).
pub const JWT_TOKEN_PREFIX: &str = "ey";

/// The `openid` scope.
pub const SCOPE_OPENID: &str = "openid";

/// The `offline_access` scope.
pub const SCOPE_OFFLINE_ACCESS: &str = "offline_access";

pub const CLAIM_API_SESSION_ID: &str = "z_asid";
pub const CLAIM_EXTERNAL_ID: &str = "z_eid";
pub const CLAIM_IS_ADMIN: &str = "z_ia";
pub const CLAIM_CONFIG_TYPES: &str = "z_ct";
pub const CLAIM_APPLICATION_ID: &str = "z_aid";
pub const CLAIM_TOKEN_TYPE: &str = "z_t";
pub const CLAIM_CERT_FINGERPRINTS: &str = "z_cfs";
pub const CLAIM_SCOPES: &str = "scopes";
pub const CLAIM_SDK_INFO: &str = "z_sdk";
pub const CLAIM_ENV_INFO: &str = "z_env";
pub const CLAIM_REMOTE_ADDRESS: &str = "z_ra";

/// The `z_t` subtype distinguishing token kinds signed by the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Access token.
    #[serde(rename = "a")]
    Access,
    /// Refresh token.
    #[serde(rename = "r")]
    Refresh,
    /// Service access token.
    #[serde(rename = "s")]
    ServiceAccess,
}

impl TokenType {
    /// The wire value of the claim.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "a",
            Self::Refresh => "r",
            Self::ServiceAccess => "s",
        }
    }
}

/// SDK details reported by the connecting client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkInfo {
    pub app_id: String,
    pub app_version: String,
    pub branch: String,
    pub revision: String,
    #[serde(rename = "type")]
    pub sdk_type: String,
    pub version: String,
}

/// Host environment reported by the connecting client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvInfo {
    pub arch: String,
    pub os: String,
    pub os_release: String,
    pub os_version: String,
    pub hostname: String,
    pub domain: String,
}

// ============================================================================
// Standard claims
// ============================================================================

/// Registered and OIDC claims shared by every token type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: String,

    /// Subject: the identity id, or the client id for service credentials.
    pub sub: String,

    /// Audience.
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,

    /// Token id.
    #[serde(default)]
    pub jti: String,

    /// Expiration (unix seconds).
    pub exp: i64,

    /// Issued at (unix seconds).
    #[serde(default)]
    pub iat: i64,

    /// Not before (unix seconds).
    #[serde(default)]
    pub nbf: i64,

    /// Time of primary authentication (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Authentication methods used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Client the token was issued to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,

    /// Nonce from the authorization request (ID tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl StandardClaims {
    /// Sets `iat`/`nbf` to `now`, `exp` to `now + lifetime` and draws a new `jti`.
    pub fn stamp(&mut self, now: OffsetDateTime, lifetime: Duration) {
        self.jti = uuid::Uuid::new_v4().to_string();
        self.iat = now.unix_timestamp();
        self.nbf = now.unix_timestamp();
        self.exp = (now + lifetime).unix_timestamp();
    }

    /// Expiration as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Issue time as a timestamp.
    #[must_use]
    pub fn issued_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.iat).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Returns `true` if `aud` contains `target`.
    #[must_use]
    pub fn has_audience(&self, target: &str) -> bool {
        self.aud.iter().any(|a| a == target)
    }

    /// Scopes split out of the `scope` claim.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// ============================================================================
// Custom claims
// ============================================================================

/// Ziti-specific claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomClaims {
    #[serde(rename = "z_asid", skip_serializing_if = "String::is_empty")]
    pub api_session_id: String,

    #[serde(rename = "z_eid", skip_serializing_if = "String::is_empty")]
    pub external_id: String,

    #[serde(rename = "z_ia", skip_serializing_if = "std::ops::Not::not")]
    pub is_admin: bool,

    #[serde(rename = "z_ct", skip_serializing_if = "Vec::is_empty")]
    pub config_types: Vec<String>,

    #[serde(rename = "z_aid", skip_serializing_if = "String::is_empty")]
    pub application_id: String,

    #[serde(rename = "z_t", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,

    #[serde(rename = "z_cfs")]
    pub cert_fingerprints: Vec<String>,

    #[serde(rename = "scopes", skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(rename = "z_sdk", skip_serializing_if = "Option::is_none")]
    pub sdk_info: Option<SdkInfo>,

    #[serde(rename = "z_env", skip_serializing_if = "Option::is_none")]
    pub env_info: Option<EnvInfo>,

    #[serde(rename = "z_ra", skip_serializing_if = "String::is_empty")]
    pub remote_address: String,
}

impl CustomClaims {
    /// The claims as a JSON object, keyed by wire name.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

// ============================================================================
// Token claim sets
// ============================================================================

/// Access to the two halves of a signed claim set.
pub trait TokenClaims: Serialize + serde::de::DeserializeOwned + Send + Sync {
    fn standard(&self) -> &StandardClaims;
    fn custom(&self) -> &CustomClaims;
}

macro_rules! token_claims {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub standard: StandardClaims,
            #[serde(flatten)]
            pub custom: CustomClaims,
        }

        impl $name {
            /// Returns `true` if the subject completed a TOTP check.
            #[must_use]
            pub fn totp_complete(&self) -> bool {
                self.standard.amr.iter().any(|m| m == crate::oauth::AMR_TOTP)
            }

            /// Returns `true` if `aud` contains `target`.
            #[must_use]
            pub fn has_audience(&self, target: &str) -> bool {
                self.standard.has_audience(target)
            }
        }

        impl TokenClaims for $name {
            fn standard(&self) -> &StandardClaims {
                &self.standard
            }

            fn custom(&self) -> &CustomClaims {
                &self.custom
            }
        }
    };
}

token_claims!(
    /// Claims of an access token (`z_t = "a"`).
    AccessClaims
);

token_claims!(
    /// Claims of a refresh token (`z_t = "r"`).
    RefreshClaims
);

token_claims!(
    /// Claims of an ID token.
    IdTokenClaims
);

impl From<RefreshClaims> for AccessClaims {
    fn from(claims: RefreshClaims) -> Self {
        Self {
            standard: claims.standard,
            custom: claims.custom,
        }
    }
}

impl AccessClaims {
    /// Config types as a set.
    #[must_use]
    pub fn config_types_set(&self) -> HashSet<&str> {
        self.custom.config_types.iter().map(String::as_str).collect()
    }

    /// Derives refresh claims: same subject and custom claims, new id and lifetime.
    #[must_use]
    pub fn to_refresh(&self, now: OffsetDateTime, lifetime: Duration) -> RefreshClaims {
        let mut standard = self.standard.clone();
        standard.stamp(now, lifetime);
        let mut custom = self.custom.clone();
        custom.token_type = Some(TokenType::Refresh);
        RefreshClaims { standard, custom }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn access_claims() -> AccessClaims {
        let mut claims = AccessClaims {
            standard: StandardClaims {
                iss: "https://ctrl.example.com:1280/oidc".to_string(),
                sub: "identity-1".to_string(),
                aud: vec![AUDIENCE_OPENZITI.to_string()],
                amr: vec!["password".to_string(), "totp".to_string()],
                client_id: CLIENT_ID_OPENZITI.to_string(),
                scope: "openid offline_access".to_string(),
                ..StandardClaims::default()
            },
            custom: CustomClaims {
                api_session_id: "asid-1".to_string(),
                config_types: vec!["ct-1".to_string(), "ct-2".to_string()],
                token_type: Some(TokenType::Access),
                ..CustomClaims::default()
            },
        };
        claims
            .standard
            .stamp(OffsetDateTime::now_utc(), Duration::minutes(30));
        claims
    }

    #[test]
    fn test_access_claims_serialize_flat() {
        let claims = access_claims();
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["sub"], "identity-1");
        assert_eq!(value["z_asid"], "asid-1");
        assert_eq!(value["z_t"], "a");
        assert_eq!(value["z_ct"], json!(["ct-1", "ct-2"]));
        assert_eq!(value["z_cfs"], json!([]));
        assert!(value.get("z_ia").is_none());
        assert!(value.get("z_eid").is_none());

        let back: AccessClaims = serde_json::from_value(value).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_audience_accepts_single_string() {
        let claims: AccessClaims = serde_json::from_value(json!({
            "sub": "identity-1",
            "aud": "openziti",
            "exp": 100,
            "z_t": "a",
        }))
        .unwrap();
        assert!(claims.has_audience(AUDIENCE_OPENZITI));
        assert_eq!(claims.custom.token_type, Some(TokenType::Access));
    }

    #[test]
    fn test_unknown_token_type_rejected() {
        let result = serde_json::from_value::<AccessClaims>(json!({
            "sub": "identity-1",
            "exp": 100,
            "z_t": "x",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_totp_complete() {
        let mut claims = access_claims();
        assert!(claims.totp_complete());
        claims.standard.amr.retain(|m| m != "totp");
        assert!(!claims.totp_complete());
    }

    #[test]
    fn test_to_refresh_keeps_custom_claims() {
        let access = access_claims();
        let now = OffsetDateTime::now_utc();
        let refresh = access.to_refresh(now, Duration::hours(24));

        assert_eq!(refresh.custom.token_type, Some(TokenType::Refresh));
        assert_eq!(refresh.custom.api_session_id, "asid-1");
        assert_eq!(refresh.standard.sub, access.standard.sub);
        assert_ne!(refresh.standard.jti, access.standard.jti);
        assert_eq!(refresh.standard.exp, (now + Duration::hours(24)).unix_timestamp());
    }

    #[test]
    fn test_config_types_set() {
        let claims = access_claims();
        let set = claims.config_types_set();
        assert!(set.contains("ct-1"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_custom_claims_to_map() {
        let custom = CustomClaims {
            api_session_id: "asid-1".to_string(),
            is_admin: true,
            external_id: "ext-1".to_string(),
            ..CustomClaims::default()
        };
        let map = custom.to_map().unwrap();
        assert_eq!(map[CLAIM_API_SESSION_ID], "asid-1");
        assert_eq!(map[CLAIM_IS_ADMIN], true);
        assert_eq!(map[CLAIM_EXTERNAL_ID], "ext-1");
        assert!(!map.contains_key(CLAIM_TOKEN_TYPE));
    }

    #[test]
    fn test_scopes_split() {
        let claims = access_claims();
        assert_eq!(claims.standard.scopes(), vec!["openid", "offline_access"]);
    }
}
