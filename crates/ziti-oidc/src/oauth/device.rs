//! Device authorization grant state.

use time::OffsetDateTime;

/// State of one device-code / user-code pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationState {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires: OffsetDateTime,
    /// Identity that approved the request; empty until completed.
    pub subject: String,
    pub done: bool,
    pub denied: bool,
}

impl DeviceAuthorizationState {
    #[must_use]
    pub fn new(client_id: impl Into<String>, scopes: Vec<String>, expires: OffsetDateTime) -> Self {
        Self {
            client_id: client_id.into(),
            scopes,
            expires,
            subject: String::new(),
            done: false,
            denied: false,
        }
    }

    /// Returns `true` if the pair has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires <= now
    }
}

/// Registry entry keyed by device code.
#[derive(Debug, Clone)]
pub(crate) struct DeviceAuthorizationEntry {
    pub device_code: String,
    pub user_code: String,
    pub state: DeviceAuthorizationState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_expiry() {
        let now = OffsetDateTime::now_utc();
        let state = DeviceAuthorizationState::new("openziti", vec![], now + Duration::minutes(5));
        assert!(!state.is_expired(now));
        assert!(state.is_expired(now + Duration::minutes(5)));
        assert!(!state.done);
        assert!(!state.denied);
        assert!(state.subject.is_empty());
    }
}
