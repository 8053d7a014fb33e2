//! Identity reconciliation.
//!
//! Clients address entities by the `clientId` they generated offline, by
//! the server id once they have learned it, or both. The reconciler turns
//! such a reference into the stored entity.
//!
//! When a server id is given it is authoritative: a reference carrying a
//! server id is never resolved through its `clientId`. Tombstones resolve
//! like live entities; the caller decides what a tombstone means.

use crate::persistence::Persistence;
use crate::store::StoreError;
use flowdeck_sync_protocol::{EntityKind, EntityRef, SyncEntity};
use std::sync::Arc;
use thiserror::Error;

/// Why a reference did not resolve.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Neither identifier is known to the server.
    #[error("no {kind} matches the reference")]
    NotFound {
        /// Entity kind that was searched.
        kind: EntityKind,
    },

    /// The lookup itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A resolved reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRef {
    /// The stored entity, possibly a tombstone.
    pub entity: SyncEntity,
    /// True if resolution went through the client id mapping.
    pub via_client_id: bool,
}

/// Resolves entity references against the store.
#[derive(Clone)]
pub struct IdentityReconciler {
    persistence: Arc<Persistence>,
}

impl IdentityReconciler {
    /// Creates a reconciler.
    pub fn new(persistence: Arc<Persistence>) -> Self {
        Self { persistence }
    }

    /// Resolves a reference by server id or client id.
    pub async fn resolve(
        &self,
        owner: &str,
        kind: EntityKind,
        target: &EntityRef,
    ) -> Result<ResolvedRef, IdentityError> {
        let found = match (target.id, target.client_id.as_deref()) {
            (Some(id), _) => self
                .persistence
                .get(owner, kind, id)
                .await?
                .map(|entity| ResolvedRef {
                    entity,
                    via_client_id: false,
                }),
            (None, Some(client_id)) => self
                .lookup_client_id(owner, kind, client_id)
                .await?
                .map(|entity| ResolvedRef {
                    entity,
                    via_client_id: true,
                }),
            (None, None) => None,
        };

        found.ok_or(IdentityError::NotFound { kind })
    }

    /// Looks up the entity created under `client_id`.
    pub async fn lookup_client_id(
        &self,
        owner: &str,
        kind: EntityKind,
        client_id: &str,
    ) -> Result<Option<SyncEntity>, StoreError> {
        self.persistence
            .find_by_client_id(owner, kind, client_id)
            .await
    }
}
