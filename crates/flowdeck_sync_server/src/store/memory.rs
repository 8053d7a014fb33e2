//! In-memory entity store.

use super::{EntityStore, NewEntity, StoreError, StoreResult};
use crate::clock::{Clock, MonotonicClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{EntityKind, EntityPayload, FeedCursor, KindStatus, SyncEntity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    owner: String,
    kind: EntityKind,
    client_id: String,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    owner: String,
    entity: SyncEntity,
}

#[derive(Debug, Default)]
struct State {
    entities: HashMap<Uuid, StoredEntity>,
    client_ids: HashMap<ClientKey, Uuid>,
}

impl State {
    fn owned(&self, owner: &str, kind: EntityKind, id: Uuid) -> Option<&StoredEntity> {
        self.entities
            .get(&id)
            .filter(|s| s.owner == owner && s.entity.kind == kind)
    }

    fn owned_mut(&mut self, owner: &str, kind: EntityKind, id: Uuid) -> Option<&mut StoredEntity> {
        self.entities
            .get_mut(&id)
            .filter(|s| s.owner == owner && s.entity.kind == kind)
    }
}

/// Entity store backed by process memory.
///
/// Changes are stamped with the server clock while the write lock is
/// held, so a reader that starts after a clock reading sees every change
/// stamped at or before it.
pub struct MemoryStore {
    state: RwLock<State>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store with its own monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Creates an empty store stamping changes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            clock,
        }
    }

    /// Returns the number of stored entities, tombstones included.
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> StoreResult<Option<SyncEntity>> {
        let state = self.state.read();
        Ok(state.owned(owner, kind, id).map(|s| s.entity.clone()))
    }

    async fn find_by_client_id(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: &str,
    ) -> StoreResult<Option<SyncEntity>> {
        let state = self.state.read();
        let key = ClientKey {
            owner: owner.to_string(),
            kind,
            client_id: client_id.to_string(),
        };
        Ok(state
            .client_ids
            .get(&key)
            .and_then(|id| state.owned(owner, kind, *id))
            .map(|s| s.entity.clone()))
    }

    async fn insert(&self, owner: &str, entity: NewEntity) -> StoreResult<SyncEntity> {
        let mut state = self.state.write();
        let key = ClientKey {
            owner: owner.to_string(),
            kind: entity.kind,
            client_id: entity.client_id.clone(),
        };
        if state.client_ids.contains_key(&key) {
            return Err(StoreError::DuplicateClientId {
                kind: entity.kind,
                client_id: entity.client_id,
            });
        }

        let mut id = Uuid::new_v4();
        while state.entities.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let stored = SyncEntity {
            id,
            client_id: Some(entity.client_id),
            kind: entity.kind,
            data: entity.data,
            updated_at: entity.updated_at,
            synced_at: self.clock.now(),
            deleted_at: None,
        };
        state.client_ids.insert(key, id);
        state.entities.insert(
            id,
            StoredEntity {
                owner: owner.to_string(),
                entity: stored.clone(),
            },
        );
        Ok(stored)
    }

    async fn update(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        data: EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        let mut state = self.state.write();
        let stored = state
            .owned_mut(owner, kind, id)
            .filter(|s| !s.entity.is_deleted())
            .ok_or(StoreError::NotFound(id))?;

        stored.entity.data = data;
        stored.entity.updated_at = updated_at;
        stored.entity.synced_at = self.clock.now();
        Ok(stored.entity.clone())
    }

    async fn delete(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity> {
        let mut state = self.state.write();
        let stored = state
            .owned_mut(owner, kind, id)
            .ok_or(StoreError::NotFound(id))?;

        if !stored.entity.is_deleted() {
            let now = self.clock.now();
            stored.entity.updated_at = stored.entity.updated_at.max(deleted_at);
            stored.entity.synced_at = now;
            stored.entity.deleted_at = Some(now);
        }
        Ok(stored.entity.clone())
    }

    async fn changed_since(
        &self,
        owner: &str,
        kinds: &[EntityKind],
        cursor: Option<FeedCursor>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SyncEntity>> {
        let state = self.state.read();
        let mut rows: Vec<SyncEntity> = state
            .entities
            .values()
            .filter(|s| s.owner == owner && kinds.contains(&s.entity.kind))
            .map(|s| &s.entity)
            .filter(|e| e.synced_at <= until)
            .filter(|e| cursor.map_or(true, |c| c.admits(e.synced_at, e.id)))
            .cloned()
            .collect();

        rows.sort_by(|a, b| (a.synced_at, a.id).cmp(&(b.synced_at, b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn stats(&self, owner: &str, kind: EntityKind) -> StoreResult<KindStatus> {
        let state = self.state.read();
        let mut status = KindStatus::default();
        for entity in state
            .entities
            .values()
            .filter(|s| s.owner == owner && s.entity.kind == kind)
            .map(|s| &s.entity)
        {
            if entity.is_deleted() {
                status.deleted_count += 1;
            } else {
                status.live_count += 1;
            }
            status.last_synced_at = status.last_synced_at.max(Some(entity.synced_at));
        }
        Ok(status)
    }
}
