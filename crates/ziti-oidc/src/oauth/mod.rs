//! OIDC protocol state: auth requests, clients, device flow and token exchange.

pub mod auth_request;
pub mod client;
pub mod device;
pub mod exchange;

pub use auth_request::{
    AuthQuery, AuthRequest, AuthRequestState, AuthorizeParams, ExternalJwtSigner,
    TOTP_LOGIN_PATH, TransportInfo, secondary_ext_jwt_amr,
};
pub use client::{
    AccessTokenType, ApplicationType, AuthMethod, Client, GrantType, LoginUrlResolver,
    ResponseType,
};
pub use device::DeviceAuthorizationState;
pub use exchange::{ExchangeTokenType, TokenExchangeParams, validate_token_exchange};

/// Password primary authentication.
pub const AMR_PASSWORD: &str = "password";

/// Client certificate primary authentication.
pub const AMR_CERT: &str = "cert";

/// External JWT primary authentication.
pub const AMR_EXT_JWT: &str = "ext-jwt";

/// TOTP secondary authentication.
pub const AMR_TOTP: &str = "totp";

/// Prefix of the secondary external JWT AMR, `ejs:<signerId>`.
pub const AMR_SECONDARY_EXT_JWT: &str = "ejs";
