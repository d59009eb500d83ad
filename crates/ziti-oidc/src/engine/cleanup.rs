//! Periodic sweep of abandoned logins and expired in-memory state.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::error::{OidcError, OidcResult};

use super::{StorageEngine, lifetime};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub auth_requests: usize,
    pub codes: usize,
    pub issued_claims: usize,
    pub consumed_refresh: usize,
    pub device_codes: usize,
}

impl SweepStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl StorageEngine {
    /// Sweeps with the cutoff `now - auth_request_ttl`.
    pub fn clean(&self) -> SweepStats {
        let now = OffsetDateTime::now_utc();
        self.clean_at(now, now - lifetime(self.config.auth_request_ttl))
    }

    /// Removes auth requests created at or before `cutoff`, the codes bound
    /// to them, and every other entry already expired.
    pub fn clean_before(&self, cutoff: OffsetDateTime) -> SweepStats {
        self.clean_at(OffsetDateTime::now_utc(), cutoff)
    }

    fn clean_at(&self, now: OffsetDateTime, cutoff: OffsetDateTime) -> SweepStats {
        let mut stats = SweepStats::default();

        let abandoned: HashSet<String> = self
            .auth_requests
            .iter()
            .filter(|r| r.created_at <= cutoff)
            .map(|r| r.key().clone())
            .collect();
        for id in &abandoned {
            if self.auth_requests.remove(id).is_some() {
                stats.auth_requests += 1;
            }
        }

        if !abandoned.is_empty() {
            let before = self.codes.len();
            self.codes.retain(|_, id| !abandoned.contains(id));
            stats.codes = before.saturating_sub(self.codes.len());
        }

        let before = self.issued_claims.len();
        self.issued_claims.retain(|_, c| c.expires_at > now);
        stats.issued_claims = before.saturating_sub(self.issued_claims.len());

        let before = self.consumed_refresh.len();
        self.consumed_refresh.retain(|_, expires_at| *expires_at > now);
        stats.consumed_refresh = before.saturating_sub(self.consumed_refresh.len());

        let expired: Vec<(String, String)> = self
            .device_codes
            .iter()
            .filter(|e| e.state.is_expired(now))
            .map(|e| (e.device_code.clone(), e.user_code.clone()))
            .collect();
        for (device_code, user_code) in expired {
            self.device_codes.remove(&device_code);
            self.user_codes
                .remove_if(&user_code, |_, bound| *bound == device_code);
            stats.device_codes += 1;
        }

        if !stats.is_empty() {
            tracing::debug!(
                auth_requests = stats.auth_requests,
                codes = stats.codes,
                issued_claims = stats.issued_claims,
                consumed_refresh = stats.consumed_refresh,
                device_codes = stats.device_codes,
                "oidc sweep removed entries"
            );
        }

        stats
    }

    /// Runs [`clean`](Self::clean) every `cleanup_interval` until `shutdown`
    /// turns `true`, its sender is dropped, or the engine is dropped.
    pub(super) fn spawn_cleanup(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> OidcResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| OidcError::configuration(format!("no tokio runtime: {e}")))?;

        let engine: Weak<Self> = Arc::downgrade(self);
        let mut interval = tokio::time::interval(self.config.cleanup_interval);

        handle.spawn(async move {
            tracing::info!("oidc cleanup sweep started");
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;

                    result = shutdown.changed() => {
                        match result {
                            Ok(()) if *shutdown.borrow() => {
                                tracing::info!("oidc cleanup sweep shutting down");
                                break;
                            }
                            Ok(()) => {}
                            Err(_) => {
                                tracing::info!("oidc cleanup sweep shutdown channel closed");
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        let Some(engine) = engine.upgrade() else {
                            break;
                        };
                        engine.clean();
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::TransportInfo;
    use crate::test_support::{Mocks, authorize_params};
    use time::Duration;

    #[tokio::test]
    async fn test_sweep_boundary() {
        let engine = Mocks::new().engine();
        let request = engine
            .create_auth_request(authorize_params(), &TransportInfo::default(), "")
            .await
            .unwrap();
        engine.save_auth_code(&request.id, "code-1").unwrap();
        let created = request.created_at;

        // A sweep at created + 9m59s keeps it.
        let stats = engine.clean_before(created + Duration::seconds(599) - Duration::minutes(10));
        assert_eq!(stats.auth_requests, 0);
        assert!(engine.auth_request_by_id(&request.id).is_ok());

        // A sweep at exactly created + 10m removes it and its code.
        let stats = engine.clean_before(created);
        assert_eq!(stats.auth_requests, 1);
        assert_eq!(stats.codes, 1);
        assert!(engine.auth_request_by_id(&request.id).is_err());
        assert!(engine.auth_request_by_code("code-1").is_err());
    }

    #[tokio::test]
    async fn test_sweep_purges_only_codes_of_abandoned_requests() {
        let engine = Mocks::new().engine();
        let mut ids = Vec::new();
        for i in 0..20 {
            let request = engine
                .create_auth_request(authorize_params(), &TransportInfo::default(), "")
                .await
                .unwrap();
            engine.save_auth_code(&request.id, &format!("code-{i}")).unwrap();
            ids.push(request.id);
        }
        let cutoff = OffsetDateTime::now_utc();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let fresh = engine
            .create_auth_request(authorize_params(), &TransportInfo::default(), "")
            .await
            .unwrap();
        engine.save_auth_code(&fresh.id, "code-fresh").unwrap();

        let stats = engine.clean_before(cutoff);
        assert_eq!(stats.auth_requests, 20);
        assert_eq!(stats.codes, 20);
        assert!(ids.iter().all(|id| engine.auth_request_by_id(id).is_err()));
        assert_eq!(engine.auth_request_by_code("code-fresh").unwrap().id, fresh.id);
    }

    #[tokio::test]
    async fn test_clean_keeps_fresh_requests() {
        let engine = Mocks::new().engine();
        let request = engine
            .create_auth_request(authorize_params(), &TransportInfo::default(), "")
            .await
            .unwrap();
        assert!(engine.clean().is_empty());
        assert!(engine.auth_request_by_id(&request.id).is_ok());
    }

    #[tokio::test]
    async fn test_expired_device_codes_are_dropped() {
        let engine = Mocks::new().engine();
        engine
            .store_device_authorization(
                "openziti",
                "device-1",
                "ABCD",
                OffsetDateTime::now_utc() - Duration::seconds(1),
                vec![],
            )
            .unwrap();
        engine
            .store_device_authorization(
                "openziti",
                "device-2",
                "EFGH",
                OffsetDateTime::now_utc() + Duration::minutes(5),
                vec![],
            )
            .unwrap();

        let stats = engine.clean();
        assert_eq!(stats.device_codes, 1);
        assert!(engine.device_authorization_by_user_code("ABCD").is_err());
        assert!(engine.device_authorization_by_user_code("EFGH").is_ok());

        // The user code is free again.
        engine
            .store_device_authorization(
                "openziti",
                "device-3",
                "ABCD",
                OffsetDateTime::now_utc() + Duration::minutes(5),
                vec![],
            )
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_runs_until_shutdown() {
        let mocks = Mocks::new();
        let (tx, rx) = watch::channel(false);
        let engine = StorageEngine::new(
            crate::test_support::config(),
            crate::test_support::signing_key(),
            mocks.collaborators(),
            rx,
        )
        .unwrap();

        engine
            .store_device_authorization(
                "openziti",
                "device-1",
                "ABCD",
                OffsetDateTime::now_utc() - Duration::seconds(1),
                vec![],
            )
            .unwrap();

        tokio::time::sleep(engine.config().cleanup_interval * 2).await;
        assert!(engine.device_authorization_by_user_code("ABCD").is_err());

        tx.send(true).unwrap();
        tokio::task::yield_now().await;
    }
}
