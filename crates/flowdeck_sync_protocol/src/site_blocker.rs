//! Site-blocker bulk payload.
//!
//! The browser extension pushes its block list as one payload of creates
//! and deletes. Deletes may name the server id, the client id, or both: an
//! extension that went offline right after adding a site never learned the
//! server id.

use crate::entity::{EntityKind, EntityPayload, SiteBlocker, SiteCategory};
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{validate_client_id, Action, EntityRef, ValidatedOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A site to add to the block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSiteBlockerInput {
    /// Client-generated identifier.
    pub client_id: String,
    /// URL or host to block.
    pub url: String,
    /// Category of the site.
    pub category: SiteCategory,
}

/// A site to remove from the block list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteSiteBlockerInput {
    /// Server identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Client-generated identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Bulk change to the block list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkSyncPayload {
    /// Sites to add.
    #[serde(default)]
    pub creates: Vec<CreateSiteBlockerInput>,
    /// Sites to remove.
    #[serde(default)]
    pub deletes: Vec<DeleteSiteBlockerInput>,
}

impl BulkSyncPayload {
    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.creates.len() + self.deletes.len()
    }

    /// Returns true if the payload holds no changes.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }

    /// Converts the payload to site-blocker operations.
    ///
    /// Creates come first, then deletes; indices follow that order. All
    /// operations carry `timestamp`, the server receive time, since the
    /// payload has no per-change timestamps.
    pub fn into_operations(
        self,
        timestamp: DateTime<Utc>,
        max_operations: usize,
    ) -> ProtocolResult<Vec<ValidatedOperation>> {
        let actual = self.len();
        if actual == 0 || actual > max_operations {
            return Err(ProtocolError::BatchSize {
                max: max_operations,
                actual,
            });
        }

        let mut operations = Vec::with_capacity(actual);

        for create in self.creates {
            let index = operations.len();
            let payload = EntityPayload::from(SiteBlocker::new(create.url, create.category));
            validate_client_id(&create.client_id)
                .and_then(|_| payload.validate())
                .map_err(|e| e.at_operation(index))?;
            operations.push(ValidatedOperation {
                index,
                kind: EntityKind::SiteBlocker,
                timestamp,
                action: Action::Create {
                    client_id: create.client_id,
                    payload,
                },
            });
        }

        for delete in self.deletes {
            let index = operations.len();
            if delete.id.is_none() && delete.client_id.is_none() {
                return Err(ProtocolError::invalid_field(
                    "deletes",
                    "each delete needs an id or a clientId",
                )
                .at_operation(index));
            }
            if let Some(client_id) = &delete.client_id {
                validate_client_id(client_id).map_err(|e| e.at_operation(index))?;
            }
            operations.push(ValidatedOperation {
                index,
                kind: EntityKind::SiteBlocker,
                timestamp,
                action: Action::Delete {
                    target: EntityRef {
                        id: delete.id,
                        client_id: delete.client_id,
                    },
                },
            });
        }

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use serde_json::json;

    #[test]
    fn parse_payload() {
        let payload: BulkSyncPayload = serde_json::from_value(json!({
            "creates": [{"clientId": "ext-1", "url": "youtube.com", "category": "entertainment"}],
            "deletes": [{"clientId": "ext-0"}, {"id": "67e55044-10b1-426f-9247-bb680e5fe0c8"}]
        }))
        .unwrap();

        let ops = payload.into_operations(Utc::now(), 100).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].operation_kind(), OperationKind::Create);
        assert_eq!(ops[1].client_id(), Some("ext-0"));
        assert_eq!(ops[2].client_id(), None);
        assert_eq!(ops.iter().map(|o| o.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn delete_needs_some_identity() {
        let payload = BulkSyncPayload {
            creates: vec![],
            deletes: vec![DeleteSiteBlockerInput::default()],
        };
        let err = payload.into_operations(Utc::now(), 100).unwrap_err();
        assert_eq!(err.operation_index(), Some(0));
    }

    #[test]
    fn invalid_url_rejected() {
        let payload = BulkSyncPayload {
            creates: vec![CreateSiteBlockerInput {
                client_id: "ext-1".into(),
                url: "".into(),
                category: SiteCategory::Other,
            }],
            deletes: vec![],
        };
        assert!(payload.into_operations(Utc::now(), 100).is_err());
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(BulkSyncPayload::default().is_empty());
        assert!(matches!(
            BulkSyncPayload::default().into_operations(Utc::now(), 100),
            Err(ProtocolError::BatchSize { actual: 0, .. })
        ));
    }
}
