//! Operation log applier.
//!
//! Applies a validated batch one entity kind at a time. Within a kind,
//! operations run in submission order while the `(user, kind)` lock scope
//! is held. A failing operation is recorded in the result and never stops
//! its siblings.

use crate::auth::Principal;
use crate::identity::{IdentityError, IdentityReconciler};
use crate::locks::KeyedLocks;
use crate::persistence::Persistence;
use crate::store::{NewEntity, StoreError};
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{
    Action, BulkSyncResult, ConflictPolicy, ConflictReport, CreatedEntity, EntityKind,
    EntityPayload, EntityRef, OperationError, OperationErrorCode, OperationFailure, Resolution,
    SyncEntity, ValidatedBatch, ValidatedOperation,
};
use std::collections::BTreeMap;
use std::sync::Arc;

type OpResult = Result<(), OperationError>;

/// Applies sync operations through the persistence collaborator.
pub struct OperationApplier {
    persistence: Arc<Persistence>,
    identity: IdentityReconciler,
    locks: Arc<KeyedLocks>,
    policy: ConflictPolicy,
}

impl OperationApplier {
    /// Creates an applier.
    pub fn new(
        persistence: Arc<Persistence>,
        locks: Arc<KeyedLocks>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            identity: IdentityReconciler::new(Arc::clone(&persistence)),
            persistence,
            locks,
            policy,
        }
    }

    /// Returns the conflict policy in use.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Applies a whole batch, kind by kind.
    pub async fn apply(
        &self,
        principal: &Principal,
        batch: ValidatedBatch,
    ) -> BTreeMap<EntityKind, BulkSyncResult> {
        let mut results = BTreeMap::new();
        for (kind, operations) in batch.group_by_kind() {
            let result = self.apply_group(principal, kind, operations).await;
            results.insert(kind, result);
        }
        results
    }

    /// Applies the operations of one kind under its lock scope.
    #[tracing::instrument(
        skip(self, principal, operations),
        fields(
            user = %principal.user_id,
            session = %principal.session_id,
            kind = %kind,
            count = operations.len()
        )
    )]
    pub async fn apply_group(
        &self,
        principal: &Principal,
        kind: EntityKind,
        operations: Vec<ValidatedOperation>,
    ) -> BulkSyncResult {
        let _scope = self.locks.lock(&principal.user_id, kind).await;
        let owner = principal.user_id.as_str();
        let mut result = BulkSyncResult::default();

        for op in operations {
            let index = op.index;
            let client_id = op.client_id().map(str::to_string);

            let outcome = if op.kind != kind {
                Err(OperationError::new(
                    OperationErrorCode::ValidationError,
                    format!("{} operation routed to {}", op.kind, kind),
                ))
            } else {
                self.apply_one(owner, op, &mut result).await
            };

            if let Err(error) = outcome {
                tracing::debug!(
                    index,
                    code = ?error.code,
                    message = %error.message,
                    "operation failed"
                );
                result.failed.push(OperationFailure {
                    index,
                    client_id,
                    error,
                });
            }
        }

        tracing::debug!(
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            conflicts = result.conflicts.len(),
            failed = result.failed.len(),
            "applied operations"
        );
        result
    }

    async fn apply_one(
        &self,
        owner: &str,
        op: ValidatedOperation,
        result: &mut BulkSyncResult,
    ) -> OpResult {
        let ValidatedOperation {
            index,
            kind,
            timestamp,
            action,
        } = op;

        match action {
            Action::Create { client_id, payload } => {
                self.create(owner, kind, client_id, payload, timestamp, result)
                    .await
            }
            Action::Update { target, payload } => {
                self.update(owner, kind, index, target, payload, timestamp, result)
                    .await
            }
            Action::Delete { target } => self.delete(owner, kind, target, timestamp, result).await,
        }
    }

    async fn create(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: String,
        payload: EntityPayload,
        timestamp: DateTime<Utc>,
        result: &mut BulkSyncResult,
    ) -> OpResult {
        if let Some(existing) = self
            .identity
            .lookup_client_id(owner, kind, &client_id)
            .await
            .map_err(persistence_failure)?
        {
            tracing::debug!(client_id = %client_id, id = %existing.id, "create already applied");
            echo_existing(client_id, existing, result);
            return Ok(());
        }

        let new = NewEntity {
            kind,
            client_id,
            data: payload,
            updated_at: timestamp,
        };
        match self.persistence.insert(owner, &new).await {
            Ok(entity) => {
                result.created.push(CreatedEntity {
                    client_id: new.client_id,
                    entity,
                });
                Ok(())
            }
            Err(StoreError::DuplicateClientId { .. }) => {
                // An earlier attempt committed before timing out.
                let existing = self
                    .identity
                    .lookup_client_id(owner, kind, &new.client_id)
                    .await
                    .map_err(persistence_failure)?
                    .ok_or_else(|| {
                        OperationError::persistence_failure("client id mapping not readable yet")
                    })?;
                echo_existing(new.client_id, existing, result);
                Ok(())
            }
            Err(e) => Err(persistence_failure(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        owner: &str,
        kind: EntityKind,
        index: usize,
        target: EntityRef,
        payload: EntityPayload,
        timestamp: DateTime<Utc>,
        result: &mut BulkSyncResult,
    ) -> OpResult {
        let stored = match self.identity.resolve(owner, kind, &target).await {
            Ok(resolved) => resolved.entity,
            Err(IdentityError::NotFound { .. }) => return Err(unresolved(kind, &target)),
            Err(IdentityError::Store(e)) => return Err(persistence_failure(e)),
        };
        if stored.is_deleted() {
            return Err(OperationError::entity_not_found(format!(
                "{} {} was deleted",
                kind, stored.id
            )));
        }

        match self.policy.resolve(timestamp, stored.updated_at) {
            Resolution::KeepStored => {
                tracing::debug!(
                    index,
                    id = %stored.id,
                    incoming = %timestamp,
                    stored = %stored.updated_at,
                    "update discarded"
                );
                result.conflicts.push(ConflictReport {
                    index,
                    client_id: target.client_id,
                    incoming_timestamp: timestamp,
                    stored,
                });
                Ok(())
            }
            Resolution::ApplyIncoming => {
                match self
                    .persistence
                    .update(owner, kind, stored.id, &payload, timestamp)
                    .await
                {
                    Ok(entity) => {
                        result.updated.push(entity);
                        Ok(())
                    }
                    Err(StoreError::NotFound(id)) => Err(OperationError::entity_not_found(format!(
                        "{} {} was deleted",
                        kind, id
                    ))),
                    Err(e) => Err(persistence_failure(e)),
                }
            }
        }
    }

    async fn delete(
        &self,
        owner: &str,
        kind: EntityKind,
        target: EntityRef,
        timestamp: DateTime<Utc>,
        result: &mut BulkSyncResult,
    ) -> OpResult {
        let stored = match self.identity.resolve(owner, kind, &target).await {
            Ok(resolved) => resolved.entity,
            Err(IdentityError::NotFound { .. }) => {
                // Never persisted: nothing to delete.
                match (target.id, target.client_id) {
                    (Some(id), _) => result.deleted.push(id),
                    (None, Some(client_id)) => result.unknown_deletes.push(client_id),
                    (None, None) => {}
                }
                return Ok(());
            }
            Err(IdentityError::Store(e)) => return Err(persistence_failure(e)),
        };

        if stored.is_deleted() {
            result.deleted.push(stored.id);
            return Ok(());
        }

        match self.persistence.delete(owner, kind, stored.id, timestamp).await {
            Ok(tombstone) => {
                result.deleted.push(tombstone.id);
                Ok(())
            }
            Err(StoreError::NotFound(id)) => {
                result.deleted.push(id);
                Ok(())
            }
            Err(e) => Err(persistence_failure(e)),
        }
    }
}

fn echo_existing(client_id: String, existing: SyncEntity, result: &mut BulkSyncResult) {
    if existing.is_deleted() {
        result.deleted.push(existing.id);
    } else {
        result.created.push(CreatedEntity {
            client_id,
            entity: existing,
        });
    }
}

fn unresolved(kind: EntityKind, target: &EntityRef) -> OperationError {
    match (target.id, target.client_id.as_deref()) {
        (Some(id), _) => {
            OperationError::entity_not_found(format!("{} {} does not exist", kind, id))
        }
        (None, Some(client_id)) => OperationError::new(
            OperationErrorCode::IdentityNotFound,
            format!("no {} was created with client id `{}`", kind, client_id),
        ),
        (None, None) => OperationError::new(
            OperationErrorCode::IdentityNotFound,
            "operation names no entity",
        ),
    }
}

fn persistence_failure(error: StoreError) -> OperationError {
    tracing::warn!(error = %error, "persistence failure");
    OperationError::persistence_failure(error.to_string())
}
