//! Persistence collaborator.
//!
//! The sync engine never owns storage. It talks to an [`EntityStore`], which
//! keeps entities per owner and kind, records the `clientId` mapping at
//! insert time, and stamps every change with the server clock.
//!
//! Implementations must stamp `syncedAt` and make the change visible
//! atomically: a reader that took a clock reading after the stamp must
//! observe the change.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{EntityKind, EntityPayload, FeedCursor, KindStatus, SyncEntity};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend temporarily unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A call did not complete in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// An entity with this client id already exists.
    #[error("client id `{client_id}` already exists for {kind}")]
    DuplicateClientId {
        /// Entity kind.
        kind: EntityKind,
        /// Conflicting client id.
        client_id: String,
    },

    /// No entity with this id.
    #[error("entity {0} not found")]
    NotFound(Uuid),

    /// Permanent backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// An entity to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    /// Entity kind.
    pub kind: EntityKind,
    /// Client id the entity is created under.
    pub client_id: String,
    /// Payload.
    pub data: EntityPayload,
    /// Client timestamp of the create.
    pub updated_at: DateTime<Utc>,
}

/// Storage seam for the sync engine.
///
/// Every method is scoped to an owner; entities of other owners are
/// invisible.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Loads an entity by server id, tombstones included.
    async fn get(&self, owner: &str, kind: EntityKind, id: Uuid) -> StoreResult<Option<SyncEntity>>;

    /// Loads an entity by the client id it was created under.
    async fn find_by_client_id(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: &str,
    ) -> StoreResult<Option<SyncEntity>>;

    /// Inserts an entity and records its client id mapping.
    ///
    /// Fails with [`StoreError::DuplicateClientId`] if the mapping exists.
    async fn insert(&self, owner: &str, entity: NewEntity) -> StoreResult<SyncEntity>;

    /// Replaces the payload of a live entity.
    async fn update(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        data: EntityPayload,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity>;

    /// Turns an entity into a tombstone.
    ///
    /// Deleting a tombstone returns it unchanged.
    async fn delete(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<SyncEntity>;

    /// Lists entities of the given kinds changed after `cursor` and at or
    /// before `until`, ordered by `(syncedAt, id)`, at most `limit` rows.
    async fn changed_since(
        &self,
        owner: &str,
        kinds: &[EntityKind],
        cursor: Option<FeedCursor>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SyncEntity>>;

    /// Counts entities of one kind.
    async fn stats(&self, owner: &str, kind: EntityKind) -> StoreResult<KindStatus>;
}
