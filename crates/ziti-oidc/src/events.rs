//! API-session lifecycle events.
//!
//! An event is emitted every time an access token is minted for a session,
//! whether from a fresh login, a refresh or a token exchange.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::token::TokenOrigin;

/// Namespace all API-session events are published under.
pub const API_SESSION_EVENT_NS: &str = "apiSession";

/// Session type of OIDC-issued sessions.
pub const API_SESSION_TYPE_JWT: &str = "jwt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSessionEventType {
    Created,
    Refreshed,
    Exchanged,
}

impl ApiSessionEventType {
    /// The event type for tokens minted from `origin`, if one is emitted.
    #[must_use]
    pub fn for_origin(origin: TokenOrigin) -> Option<Self> {
        match origin {
            TokenOrigin::AuthRequest => Some(Self::Created),
            TokenOrigin::Refresh => Some(Self::Refreshed),
            TokenOrigin::Exchange => Some(Self::Exchanged),
            TokenOrigin::ClientCredentials => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Refreshed => "refreshed",
            Self::Exchanged => "exchanged",
        }
    }
}

impl fmt::Display for ApiSessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API-session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSessionEvent {
    pub namespace: String,
    pub event_type: ApiSessionEventType,
    /// Id of the controller that emitted the event.
    pub event_src_id: String,
    /// The API-session id.
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub identity_id: String,
    pub ip_address: String,
}

impl ApiSessionEvent {
    #[must_use]
    pub fn new(
        event_type: ApiSessionEventType,
        event_src_id: impl Into<String>,
        api_session_id: impl Into<String>,
        identity_id: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> Self {
        Self {
            namespace: API_SESSION_EVENT_NS.to_string(),
            event_type,
            event_src_id: event_src_id.into(),
            id: api_session_id.into(),
            session_type: API_SESSION_TYPE_JWT.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            identity_id: identity_id.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// Receives API-session events.
pub trait ApiSessionEventSink: Send + Sync {
    fn accept(&self, event: ApiSessionEvent);
}

/// Logs every event at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ApiSessionEventSink for TracingEventSink {
    fn accept(&self, event: ApiSessionEvent) {
        tracing::info!(
            namespace = %event.namespace,
            event_type = %event.event_type,
            event_src_id = %event.event_src_id,
            api_session_id = %event.id,
            identity_id = %event.identity_id,
            ip_address = %event.ip_address,
            "api session event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_for_origin() {
        assert_eq!(
            ApiSessionEventType::for_origin(TokenOrigin::AuthRequest),
            Some(ApiSessionEventType::Created)
        );
        assert_eq!(
            ApiSessionEventType::for_origin(TokenOrigin::Refresh),
            Some(ApiSessionEventType::Refreshed)
        );
        assert_eq!(
            ApiSessionEventType::for_origin(TokenOrigin::Exchange),
            Some(ApiSessionEventType::Exchanged)
        );
        assert_eq!(
            ApiSessionEventType::for_origin(TokenOrigin::ClientCredentials),
            None
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = ApiSessionEvent::new(
            ApiSessionEventType::Refreshed,
            "ctrl-1",
            "asid-1",
            "identity-1",
            "10.0.0.9:5512",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["namespace"], "apiSession");
        assert_eq!(json["eventType"], "refreshed");
        assert_eq!(json["type"], "jwt");
        assert_eq!(json["id"], "asid-1");
        assert_eq!(json["ipAddress"], "10.0.0.9:5512");
    }

    #[test]
    fn test_tracing_sink_accepts() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        TracingEventSink.accept(ApiSessionEvent::new(
            ApiSessionEventType::Created,
            "ctrl-1",
            "asid-1",
            "identity-1",
            "",
        ));
    }
}
