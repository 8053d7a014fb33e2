//! Fault-injecting store wrapper.
//!
//! [`FlakyStore`] delegates to an inner [`EntityStore`] and fails selected
//! calls on demand. A fault can also commit the call first and then report
//! the error, which models an acknowledgement lost on the way back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{EntityKind, EntityPayload, FeedCursor, KindStatus, SyncEntity};
use flowdeck_sync_server::{EntityStore, NewEntity, StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Store method a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    /// [`EntityStore::get`].
    Get,
    /// [`EntityStore::find_by_client_id`].
    FindByClientId,
    /// [`EntityStore::insert`].
    Insert,
    /// [`EntityStore::update`].
    Update,
    /// [`EntityStore::delete`].
    Delete,
    /// [`EntityStore::changed_since`].
    ChangedSince,
    /// [`EntityStore::stats`].
    Stats,
}

#[derive(Debug, Clone)]
struct Fault {
    call: StoreCall,
    client_id: Option<String>,
    remaining: usize,
    error: StoreError,
    commit_first: bool,
}

impl Fault {
    fn matches(&self, call: StoreCall, client_id: Option<&str>) -> bool {
        self.remaining > 0
            && self.call == call
            && match &self.client_id {
                Some(expected) => client_id == Some(expected.as_str()),
                None => true,
            }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    faults: Vec<Fault>,
    calls: HashMap<StoreCall, usize>,
}

/// A store that fails on request.
pub struct FlakyStore {
    inner: Arc<dyn EntityStore>,
    state: Mutex<FaultState>,
}

impl FlakyStore {
    /// Wraps a store.
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState::default()),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<dyn EntityStore> {
        &self.inner
    }

    /// Fails the next `times` calls of `call` with `error`.
    pub fn fail_next(&self, call: StoreCall, times: usize, error: StoreError) {
        self.push(Fault {
            call,
            client_id: None,
            remaining: times,
            error,
            commit_first: false,
        });
    }

    /// Fails the next insert of `client_id` without committing it.
    pub fn fail_insert_of(&self, client_id: &str, error: StoreError) {
        self.push(Fault {
            call: StoreCall::Insert,
            client_id: Some(client_id.to_string()),
            remaining: 1,
            error,
            commit_first: false,
        });
    }

    /// Commits the next insert of `client_id` but reports `error`.
    pub fn lose_insert_ack(&self, client_id: &str, error: StoreError) {
        self.push(Fault {
            call: StoreCall::Insert,
            client_id: Some(client_id.to_string()),
            remaining: 1,
            error,
            commit_first: true,
        });
    }

    /// Drops every pending fault.
    pub fn heal(&self) {
        self.state.lock().faults.clear();
    }

    /// Number of calls made to `call`, failed ones included.
    pub fn call_count(&self, call: StoreCall) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    fn push(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Counts the call and takes the first matching fault.
    fn take_fault(&self, call: StoreCall, client_id: Option<&str>) -> Option<(StoreError, bool)> {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        let fault = state
            .faults
            .iter_mut()
            .find(|f| f.matches(call, client_id))?;
        fault.remaining -= 1;
        let taken = (fault.error.clone(), fault.commit_first);
        state.faults.retain(|f| f.remaining > 0);
        Some(taken)
    }

    async fn run<T, F>(&self, call: StoreCall, client_id: Option<&str>, op: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        match self.take_fault(call, client_id) {
            None => op.await,
            Some((error, true)) => {
                op.await?;
                Err(error)
            }
            Some((error, false)) => Err(error),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> StoreResult<Option<SyncEntity>> {
        self.run(StoreCall::Get, None, self.inner.get(owner, kind, id))
            .await
    }

    async fn find_by_client_id(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: &str,
    ) -> StoreResult<Option<SyncEntity>> {
        self.run(
            StoreCall::FindByClientId,
            Some(client_id),
            self.inner.find_by_client_id(owner, kind, client_id),
        )
        .await
    }

    async fn insert(&self, owner: &str, entity: NewEntity) -> StoreResult<SyncEntity> {
        let client_id = entity.client_id.clone();
        self.run(
            StoreCall::Insert,
            Some(client_id.as_str()),
            self.inner.insert(owner, entity),
        )
        .await
    }

    async fn update(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        data: EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        self.run(
            StoreCall::Update,
            None,
            self.inner.update(owner, kind, id, data, updated_at),
        )
        .await
    }

    async fn delete(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        self.run(
            StoreCall::Delete,
            None,
            self.inner.delete(owner, kind, id, deleted_at),
        )
        .await
    }

    async fn changed_since(
        &self,
        owner: &str,
        kinds: &[EntityKind],
        cursor: Option<FeedCursor>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SyncEntity>> {
        self.run(
            StoreCall::ChangedSince,
            None,
            self.inner.changed_since(owner, kinds, cursor, until, limit),
        )
        .await
    }

    async fn stats(&self, owner: &str, kind: EntityKind) -> StoreResult<KindStatus> {
        self.run(StoreCall::Stats, None, self.inner.stats(owner, kind))
            .await
    }
}
