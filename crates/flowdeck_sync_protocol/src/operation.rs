//! Sync operations and batches.
//!
//! `SyncOperation` and `SyncBatch` are the wire shapes a client submits.
//! [`SyncBatch::validate`] turns them into [`ValidatedBatch`], whose
//! operations carry typed payloads and can no longer be malformed.

use crate::entity::{EntityKind, EntityPayload};
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maximum length of a client-generated identifier.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Type of sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Entity was created on the client.
    Create,
    /// Entity was modified on the client.
    Update,
    /// Entity was deleted on the client.
    Delete,
}

/// A sync operation as submitted by a client.
///
/// # Fields
///
/// - `entity_kind`: which entity table the operation targets
/// - `operation`: create, update or delete
/// - `data`: payload for create/update, absent for delete
/// - `client_id`: client-generated identifier, stable across retries
/// - `id`: server identifier, when the client already knows it
/// - `timestamp`: client time of the change, used for last-write-wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncOperation {
    /// Entity kind.
    pub entity_kind: EntityKind,
    /// Operation type.
    pub operation: OperationKind,
    /// Entity payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Client-generated identifier.
    pub client_id: String,
    /// Server identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Client timestamp of the change.
    pub timestamp: DateTime<Utc>,
}

impl SyncOperation {
    /// Creates a create operation.
    pub fn create(
        client_id: impl Into<String>,
        payload: &EntityPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind: payload.kind(),
            operation: OperationKind::Create,
            data: serde_json::to_value(payload).ok(),
            client_id: client_id.into(),
            id: None,
            timestamp,
        }
    }

    /// Creates an update operation.
    pub fn update(
        client_id: impl Into<String>,
        payload: &EntityPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: OperationKind::Update,
            ..Self::create(client_id, payload, timestamp)
        }
    }

    /// Creates a delete operation.
    pub fn delete(
        entity_kind: EntityKind,
        client_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind,
            operation: OperationKind::Delete,
            data: None,
            client_id: client_id.into(),
            id: None,
            timestamp,
        }
    }

    /// Sets the server identifier.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Validates this operation and converts it to its typed form.
    ///
    /// `index` is the position of the operation in its batch.
    pub fn validate(self, index: usize) -> ProtocolResult<ValidatedOperation> {
        self.validate_inner(index)
            .map_err(|e| e.at_operation(index))
    }

    fn validate_inner(self, index: usize) -> ProtocolResult<ValidatedOperation> {
        validate_client_id(&self.client_id)?;
        let kind = self.entity_kind;

        let action = match (self.operation, self.data) {
            (OperationKind::Create, Some(data)) => {
                if self.id.is_some() {
                    return Err(ProtocolError::invalid_field(
                        "id",
                        "server id cannot be chosen by a create",
                    ));
                }
                Action::Create {
                    client_id: self.client_id,
                    payload: EntityPayload::from_json(kind, data)?,
                }
            }
            (OperationKind::Update, Some(data)) => Action::Update {
                target: EntityRef {
                    id: self.id,
                    client_id: Some(self.client_id),
                },
                payload: EntityPayload::from_json(kind, data)?,
            },
            (OperationKind::Delete, None) => Action::Delete {
                target: EntityRef {
                    id: self.id,
                    client_id: Some(self.client_id),
                },
            },
            (OperationKind::Delete, Some(_)) => {
                return Err(ProtocolError::invalid_field(
                    "data",
                    "must be absent for delete",
                ))
            }
            (_, None) => {
                return Err(ProtocolError::invalid_field(
                    "data",
                    "is required for create and update",
                ))
            }
        };

        Ok(ValidatedOperation {
            index,
            kind,
            timestamp: self.timestamp,
            action,
        })
    }
}

/// Checks a client-generated identifier.
pub fn validate_client_id(client_id: &str) -> ProtocolResult<()> {
    if client_id.trim().is_empty() {
        return Err(ProtocolError::invalid_field("clientId", "must not be empty"));
    }
    if client_id.chars().count() > MAX_CLIENT_ID_LEN {
        return Err(ProtocolError::invalid_field(
            "clientId",
            format!("must be at most {} characters", MAX_CLIENT_ID_LEN),
        ));
    }
    Ok(())
}

/// Reference to an existing entity by server id and/or client id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityRef {
    /// Server identifier.
    pub id: Option<Uuid>,
    /// Client-generated identifier.
    pub client_id: Option<String>,
}

impl EntityRef {
    /// Reference by server identifier.
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            client_id: None,
        }
    }

    /// Reference by client-generated identifier.
    pub fn by_client_id(client_id: impl Into<String>) -> Self {
        Self {
            id: None,
            client_id: Some(client_id.into()),
        }
    }
}

/// What a validated operation does.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create a new entity.
    Create {
        /// Idempotency key of the create.
        client_id: String,
        /// Entity payload.
        payload: EntityPayload,
    },
    /// Replace the payload of an existing entity.
    Update {
        /// Entity to update.
        target: EntityRef,
        /// New payload.
        payload: EntityPayload,
    },
    /// Delete an entity.
    Delete {
        /// Entity to delete.
        target: EntityRef,
    },
}

/// An operation that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOperation {
    /// Position in the submitted batch.
    pub index: usize,
    /// Entity kind.
    pub kind: EntityKind,
    /// Client timestamp of the change.
    pub timestamp: DateTime<Utc>,
    /// What to do.
    pub action: Action,
}

impl ValidatedOperation {
    /// Returns the client identifier carried by the operation, if any.
    pub fn client_id(&self) -> Option<&str> {
        match &self.action {
            Action::Create { client_id, .. } => Some(client_id),
            Action::Update { target, .. } | Action::Delete { target } => {
                target.client_id.as_deref()
            }
        }
    }

    /// Returns the operation type.
    pub fn operation_kind(&self) -> OperationKind {
        match self.action {
            Action::Create { .. } => OperationKind::Create,
            Action::Update { .. } => OperationKind::Update,
            Action::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// A batch of operations as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncBatch {
    /// Operations in submission order.
    pub operations: Vec<SyncOperation>,
    /// Cursor of the client's last successful sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl SyncBatch {
    /// Creates a batch without a prior cursor.
    pub fn new(operations: Vec<SyncOperation>) -> Self {
        Self {
            operations,
            last_sync_timestamp: None,
        }
    }

    /// Sets the cursor of the client's last successful sync.
    pub fn with_last_sync(mut self, at: DateTime<Utc>) -> Self {
        self.last_sync_timestamp = Some(at);
        self
    }

    /// Validates every operation.
    ///
    /// Fails on the first invalid operation; a malformed batch is rejected
    /// as a whole.
    pub fn validate(self, max_operations: usize) -> ProtocolResult<ValidatedBatch> {
        let actual = self.operations.len();
        if actual == 0 || actual > max_operations {
            return Err(ProtocolError::BatchSize {
                max: max_operations,
                actual,
            });
        }

        let operations = self
            .operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| op.validate(index))
            .collect::<ProtocolResult<Vec<_>>>()?;

        Ok(ValidatedBatch {
            operations,
            last_sync_timestamp: self.last_sync_timestamp,
        })
    }
}

/// A batch whose operations all passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    /// Operations in submission order.
    pub operations: Vec<ValidatedOperation>,
    /// Cursor of the client's last successful sync.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl ValidatedBatch {
    /// Partitions operations by entity kind.
    ///
    /// Kinds come out in `EntityKind` order; submission order is kept
    /// within each kind.
    pub fn group_by_kind(self) -> BTreeMap<EntityKind, Vec<ValidatedOperation>> {
        let mut groups: BTreeMap<EntityKind, Vec<ValidatedOperation>> = BTreeMap::new();
        for op in self.operations {
            groups.entry(op.kind).or_default().push(op);
        }
        groups
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PomodoroTimer, SiteBlocker, SiteCategory};
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn blocker(url: &str) -> EntityPayload {
        SiteBlocker::new(url, SiteCategory::Social).into()
    }

    #[test]
    fn parse_wire_batch() {
        let body = json!({
            "operations": [
                {
                    "entityKind": "site_blocker",
                    "operation": "create",
                    "data": {"url": "twitter.com", "category": "social"},
                    "clientId": "local-1",
                    "timestamp": "2024-03-01T10:00:00Z"
                },
                {
                    "entityKind": "site_blocker",
                    "operation": "delete",
                    "clientId": "local-0",
                    "timestamp": "2024-03-01T10:00:01Z"
                }
            ],
            "lastSyncTimestamp": "2024-02-28T00:00:00Z"
        });

        let batch: SyncBatch = serde_json::from_value(body).unwrap();
        assert_eq!(batch.operations.len(), 2);
        assert!(batch.last_sync_timestamp.is_some());

        let validated = batch.validate(10).unwrap();
        assert_eq!(validated.len(), 2);
        assert_eq!(validated.operations[0].client_id(), Some("local-1"));
        assert_eq!(
            validated.operations[1].operation_kind(),
            OperationKind::Delete
        );
    }

    #[test]
    fn reject_unknown_top_level_field() {
        let body = json!({"operations": [], "cursor": 5});
        assert!(serde_json::from_value::<SyncBatch>(body).is_err());
    }

    #[test]
    fn reject_unknown_kind_on_wire() {
        let body = json!({
            "entityKind": "calendar_event",
            "operation": "create",
            "data": {},
            "clientId": "c",
            "timestamp": "2024-03-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<SyncOperation>(body).is_err());
    }

    #[test]
    fn batch_size_limits() {
        let empty = SyncBatch::new(vec![]);
        assert!(matches!(
            empty.validate(10),
            Err(ProtocolError::BatchSize { actual: 0, .. })
        ));

        let ops = (0..3)
            .map(|i| SyncOperation::create(format!("c{}", i), &blocker("a.com"), ts(i)))
            .collect();
        assert!(matches!(
            SyncBatch::new(ops).validate(2),
            Err(ProtocolError::BatchSize { max: 2, actual: 3 })
        ));
    }

    #[test]
    fn delete_must_not_carry_data() {
        let mut op = SyncOperation::delete(EntityKind::SiteBlocker, "c1", ts(0));
        op.data = Some(json!({"url": "a.com", "category": "news"}));
        let err = op.validate(4).unwrap_err();
        assert_eq!(err.operation_index(), Some(4));
        assert!(err.to_string().contains("data"));
    }

    #[test]
    fn create_requires_data() {
        let mut op = SyncOperation::create("c1", &blocker("a.com"), ts(0));
        op.data = None;
        assert!(op.validate(0).is_err());
    }

    #[test]
    fn create_cannot_pick_server_id() {
        let op = SyncOperation::create("c1", &blocker("a.com"), ts(0)).with_id(Uuid::new_v4());
        assert!(op.validate(0).is_err());
    }

    #[test]
    fn payload_must_match_kind() {
        let mut op = SyncOperation::create("c1", &blocker("a.com"), ts(0));
        op.entity_kind = EntityKind::PomodoroTimer;
        let err = op.validate(1).unwrap_err();
        assert!(err.to_string().contains("pomodoro_timer"));
    }

    #[test]
    fn empty_client_id_rejected() {
        let op = SyncOperation::create("  ", &blocker("a.com"), ts(0));
        assert!(op.validate(0).is_err());

        let long = "x".repeat(MAX_CLIENT_ID_LEN + 1);
        assert!(validate_client_id(&long).is_err());
    }

    #[test]
    fn client_id_limit_counts_characters() {
        let wide = "ü".repeat(MAX_CLIENT_ID_LEN);
        assert!(validate_client_id(&wide).is_ok());
        assert!(validate_client_id(&format!("{}ü", wide)).is_err());
    }

    #[test]
    fn group_by_kind_keeps_submission_order() {
        let timer: EntityPayload = PomodoroTimer::default().into();
        let ops = vec![
            SyncOperation::create("t1", &timer, ts(0)),
            SyncOperation::create("b1", &blocker("a.com"), ts(1)),
            SyncOperation::update("t1", &timer, ts(2)),
            SyncOperation::delete(EntityKind::SiteBlocker, "b1", ts(3)),
        ];
        let groups = SyncBatch::new(ops).validate(10).unwrap().group_by_kind();

        let kinds: Vec<_> = groups.keys().copied().collect();
        assert_eq!(kinds, vec![EntityKind::SiteBlocker, EntityKind::PomodoroTimer]);

        let blockers: Vec<_> = groups[&EntityKind::SiteBlocker]
            .iter()
            .map(|op| op.index)
            .collect();
        assert_eq!(blockers, vec![1, 3]);

        let timers: Vec<_> = groups[&EntityKind::PomodoroTimer]
            .iter()
            .map(|op| op.operation_kind())
            .collect();
        assert_eq!(timers, vec![OperationKind::Create, OperationKind::Update]);
    }
}
