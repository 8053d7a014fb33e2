//! Timeout and retry around store calls.
//!
//! Every store call gets a per-attempt deadline. Transient failures
//! ([`StoreError::is_transient`]) are retried with exponential backoff;
//! everything else is returned at once. Dropping the returned future
//! cancels the outstanding attempt.

use crate::config::PersistencePolicy;
use crate::store::{EntityStore, NewEntity, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{EntityKind, EntityPayload, FeedCursor, KindStatus, SyncEntity};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// A store with the persistence policy applied.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn EntityStore>,
    policy: PersistencePolicy,
}

impl Persistence {
    /// Wraps a store.
    pub fn new(store: Arc<dyn EntityStore>, policy: PersistencePolicy) -> Self {
        Self { store, policy }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Returns the policy.
    pub fn policy(&self) -> &PersistencePolicy {
        &self.policy
    }

    async fn call<T, F, Fut>(&self, name: &'static str, mut attempt_fn: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let retry = &self.policy.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.policy.call_timeout)),
            };

            match result {
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        call = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(
                            call = name,
                            attempts = attempt + 1,
                            error = %e,
                            "store call gave up"
                        );
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    /// See [`EntityStore::get`].
    pub async fn get(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> StoreResult<Option<SyncEntity>> {
        self.call("get", || self.store.get(owner, kind, id)).await
    }

    /// See [`EntityStore::find_by_client_id`].
    pub async fn find_by_client_id(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: &str,
    ) -> StoreResult<Option<SyncEntity>> {
        self.call("find_by_client_id", || {
            self.store.find_by_client_id(owner, kind, client_id)
        })
        .await
    }

    /// See [`EntityStore::insert`].
    pub async fn insert(&self, owner: &str, entity: &NewEntity) -> StoreResult<SyncEntity> {
        self.call("insert", || self.store.insert(owner, entity.clone()))
            .await
    }

    /// See [`EntityStore::update`].
    pub async fn update(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        data: &EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        self.call("update", || {
            self.store.update(owner, kind, id, data.clone(), updated_at)
        })
        .await
    }

    /// See [`EntityStore::delete`].
    pub async fn delete(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        self.call("delete", || self.store.delete(owner, kind, id, deleted_at))
            .await
    }

    /// See [`EntityStore::changed_since`].
    pub async fn changed_since(
        &self,
        owner: &str,
        kinds: &[EntityKind],
        cursor: Option<FeedCursor>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SyncEntity>> {
        self.call("changed_since", || {
            self.store.changed_since(owner, kinds, cursor, until, limit)
        })
        .await
    }

    /// See [`EntityStore::stats`].
    pub async fn stats(&self, owner: &str, kind: EntityKind) -> StoreResult<KindStatus> {
        self.call("stats", || self.store.stats(owner, kind)).await
    }
}
