//! Token claims and the requests tokens are minted from.

pub mod claims;
pub mod request;

pub use claims::{
    AUDIENCE_OPENZITI, AccessClaims, CLAIM_API_SESSION_ID, CLAIM_APPLICATION_ID,
    CLAIM_CERT_FINGERPRINTS, CLAIM_CONFIG_TYPES, CLAIM_ENV_INFO, CLAIM_EXTERNAL_ID,
    CLAIM_IS_ADMIN, CLAIM_REMOTE_ADDRESS, CLAIM_SCOPES, CLAIM_SDK_INFO, CLAIM_TOKEN_TYPE,
    CLIENT_ID_NATIVE_LEGACY, CLIENT_ID_OPENZITI, CustomClaims, EnvInfo, IdTokenClaims, TokenClaims,
    JWT_TOKEN_PREFIX, RefreshClaims, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID, SdkInfo,
    StandardClaims, TokenType,
};
pub use request::{
    ClientCredentialsRequest, RefreshTokenRequest, TokenExchangeRequest, TokenOrigin,
    TokenRequest,
};
