//! In-process revocation store for single-controller deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::{CollaboratorResult, Revocation, RevocationStore};

/// Revocations held in memory. Nothing is replicated or persisted.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    revocations: DashMap<String, Revocation>,
}

impl InMemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops records whose expiry is at or before `now`. Returns how many were removed.
    pub fn prune_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.revocations.len();
        self.revocations.retain(|_, r| r.expires_at > now);
        before.saturating_sub(self.revocations.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revocations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revocations.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn create(&self, revocation: Revocation) -> CollaboratorResult<()> {
        self.revocations
            .entry(revocation.id.clone())
            .and_modify(|existing| {
                if revocation.expires_at > existing.expires_at {
                    existing.expires_at = revocation.expires_at;
                }
                existing.created_at = revocation.created_at;
            })
            .or_insert(revocation);
        Ok(())
    }

    async fn read(&self, id: &str) -> CollaboratorResult<Option<Revocation>> {
        Ok(self.revocations.get(id).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use tokio_test::block_on;

    #[test]
    fn test_create_and_read() {
        let store = InMemoryRevocationStore::new();
        let expires = OffsetDateTime::now_utc() + Duration::hours(1);
        block_on(store.create(Revocation::new("jti-1", expires))).unwrap();

        let found = block_on(store.read("jti-1")).unwrap().unwrap();
        assert_eq!(found.expires_at, expires);
        assert!(block_on(store.read("jti-2")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_keeps_longest_expiry() {
        let store = InMemoryRevocationStore::new();
        let now = OffsetDateTime::now_utc();
        store
            .create(Revocation::new("jti-1", now + Duration::hours(2)))
            .await
            .unwrap();
        store
            .create(Revocation::new("jti-1", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let found = store.read("jti-1").await.unwrap().unwrap();
        assert_eq!(found.expires_at, now + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let store = InMemoryRevocationStore::new();
        let now = OffsetDateTime::now_utc();
        store
            .create(Revocation::new("old", now - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .create(Revocation::new("new", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.prune_expired(now), 1);
        assert!(store.read("old").await.unwrap().is_none());
        assert!(store.read("new").await.unwrap().is_some());
    }
}
