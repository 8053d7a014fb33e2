//! Results of applying a bulk sync batch.

use crate::entity::{EntityKind, EntityPayload};
use crate::feed::{FeedCursor, FeedResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Server view of a stored entity.
///
/// Two instants are tracked:
/// - `updated_at`: client timestamp of the last winning write, compared by
///   last-write-wins
/// - `synced_at`: server clock stamp of the last change, the axis the feed
///   cursor moves along
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntity {
    /// Server identifier.
    pub id: Uuid,
    /// Client identifier the entity was created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Entity kind.
    pub kind: EntityKind,
    /// Current payload.
    pub data: EntityPayload,
    /// Last-write-wins version.
    pub updated_at: DateTime<Utc>,
    /// Server clock stamp of the last change.
    pub synced_at: DateTime<Utc>,
    /// Server clock stamp of the deletion, for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncEntity {
    /// Returns true if the entity has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A created entity together with the client id it was created under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEntity {
    /// Client identifier echoed back for local reconciliation.
    pub client_id: String,
    /// The canonical server entity.
    pub entity: SyncEntity,
}

/// An update that lost last-write-wins; the stored version is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// Position of the operation in the batch.
    pub index: usize,
    /// Client identifier of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Timestamp carried by the discarded update.
    pub incoming_timestamp: DateTime<Utc>,
    /// The version kept by the server.
    pub stored: SyncEntity,
}

/// Error code of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorCode {
    /// Operation was malformed.
    ValidationError,
    /// Neither the server id nor the client id resolved.
    IdentityNotFound,
    /// Target entity does not exist (or was deleted).
    EntityNotFound,
    /// Update lost against a newer stored version.
    ConflictDiscarded,
    /// The persistence layer failed; safe to resubmit by client id.
    PersistenceFailure,
}

impl OperationErrorCode {
    /// Returns true if resubmitting the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperationErrorCode::PersistenceFailure)
    }
}

/// Error reported for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    /// Error code.
    pub code: OperationErrorCode,
    /// Human readable message.
    pub message: String,
    /// Whether the client should retry.
    pub retryable: bool,
}

impl OperationError {
    /// Creates an error with the retry flag derived from the code.
    pub fn new(code: OperationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }

    /// Creates an entity-not-found error.
    pub fn entity_not_found(message: impl Into<String>) -> Self {
        Self::new(OperationErrorCode::EntityNotFound, message)
    }

    /// Creates a persistence failure.
    pub fn persistence_failure(message: impl Into<String>) -> Self {
        Self::new(OperationErrorCode::PersistenceFailure, message)
    }
}

/// A failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    /// Position of the operation in the batch.
    pub index: usize,
    /// Client identifier of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// What went wrong.
    pub error: OperationError,
}

/// Outcome of the operations of one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncResult {
    /// Entities created (or recognized as already created).
    pub created: Vec<CreatedEntity>,
    /// Entities whose update was applied.
    pub updated: Vec<SyncEntity>,
    /// Server ids of deleted entities.
    pub deleted: Vec<Uuid>,
    /// Client ids of deletes for entities the server never stored.
    #[serde(default)]
    pub unknown_deletes: Vec<String>,
    /// Updates discarded by last-write-wins.
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
    /// Operations that failed.
    #[serde(default)]
    pub failed: Vec<OperationFailure>,
}

impl BulkSyncResult {
    /// Returns true if nothing failed and nothing was discarded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.conflicts.is_empty()
    }

    /// Returns the batch positions of failed operations.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }

    /// Finds the created entity echoed for a client id.
    pub fn created_for(&self, client_id: &str) -> Option<&SyncEntity> {
        self.created
            .iter()
            .find(|c| c.client_id == client_id)
            .map(|c| &c.entity)
    }
}

/// Response to a bulk sync request.
///
/// `serverTimestamp` is read before the batch is applied. The batch's own
/// writes are stamped after it, so a feed resumed from it serves them once
/// more; writes of other sessions stamped at or before it are in `changes`
/// when the batch carried `lastSyncTimestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncResponse {
    /// Results per entity kind present in the batch.
    pub results: BTreeMap<EntityKind, BulkSyncResult>,
    /// Server time before the batch was applied.
    pub server_timestamp: DateTime<Utc>,
    /// Changes in `(lastSyncTimestamp, serverTimestamp]` across all kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<FeedResponse>,
}

impl BulkSyncResponse {
    /// Returns the cursor the client should poll the feed from next.
    ///
    /// If the merged changes were truncated this is their page cursor,
    /// otherwise `serverTimestamp`.
    pub fn resume_cursor(&self) -> FeedCursor {
        match &self.changes {
            Some(changes) if changes.has_more => changes.resume_cursor(),
            _ => FeedCursor::since(self.server_timestamp),
        }
    }

    /// Returns the result for one kind.
    pub fn result(&self, kind: EntityKind) -> Option<&BulkSyncResult> {
        self.results.get(&kind)
    }

    /// Returns the batch positions of all failed operations, sorted.
    pub fn failed_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .results
            .values()
            .flat_map(|r| r.failed_indices())
            .collect();
        indices.sort_unstable();
        indices
    }
}
