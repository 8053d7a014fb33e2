//! Incremental feed and sync status types.
//!
//! The feed is keyed on the server clock only. A cursor is the
//! `serverTimestamp` of a previous response, optionally refined with the id
//! of the last row of a truncated page so that rows sharing one
//! `syncedAt` value are never skipped.

use crate::entity::EntityKind;
use crate::result::SyncEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Position in the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCursor {
    /// Rows with `syncedAt` after this instant are returned.
    pub since: DateTime<Utc>,
    /// Tie-break: rows at exactly `since` with an id greater than this are
    /// also returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<Uuid>,
}

impl FeedCursor {
    /// Cursor from a previous `serverTimestamp`.
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since,
            after_id: None,
        }
    }

    /// Cursor pointing just after a given row.
    pub fn after(synced_at: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            since: synced_at,
            after_id: Some(id),
        }
    }

    /// Returns true if a row at `(synced_at, id)` lies after this cursor.
    pub fn admits(&self, synced_at: DateTime<Utc>, id: Uuid) -> bool {
        match self.after_id {
            None => synced_at > self.since,
            Some(after) => (synced_at, id) > (self.since, after),
        }
    }
}

/// A feed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRequest {
    /// Kinds to include; empty means every kind.
    pub kinds: Vec<EntityKind>,
    /// Where to resume; `None` fetches everything.
    pub cursor: Option<FeedCursor>,
    /// Page size; the server applies its default and cap.
    pub limit: Option<u32>,
}

impl FeedRequest {
    /// Query for every kind from the beginning.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to the given kinds.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Resumes from a cursor.
    pub fn with_cursor(mut self, cursor: FeedCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the requested kinds, expanding "empty" to every kind.
    pub fn resolved_kinds(&self) -> Vec<EntityKind> {
        if self.kinds.is_empty() {
            EntityKind::ALL.to_vec()
        } else {
            let mut kinds = self.kinds.clone();
            kinds.sort_unstable();
            kinds.dedup();
            kinds
        }
    }
}

/// Changes of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindFeed {
    /// Live entities, ordered by `(syncedAt, id)`.
    pub entities: Vec<SyncEntity>,
    /// Server ids of entities deleted since the cursor.
    pub deleted: Vec<Uuid>,
}

impl KindFeed {
    /// Returns true if the kind has no changes.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.deleted.is_empty()
    }
}

/// One page of the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    /// Changes grouped per requested kind.
    pub kinds: BTreeMap<EntityKind, KindFeed>,
    /// Server time captured before the query ran.
    pub server_timestamp: DateTime<Utc>,
    /// True if the page was truncated.
    pub has_more: bool,
    /// Cursor for the next page when `has_more` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<FeedCursor>,
}

impl FeedResponse {
    /// Returns the cursor the client should resume from.
    ///
    /// While pages remain this is the page cursor; once the feed is
    /// drained it is `serverTimestamp`.
    pub fn resume_cursor(&self) -> FeedCursor {
        self.next_cursor
            .unwrap_or_else(|| FeedCursor::since(self.server_timestamp))
    }

    /// Total number of changed rows on this page.
    pub fn change_count(&self) -> usize {
        self.kinds
            .values()
            .map(|k| k.entities.len() + k.deleted.len())
            .sum()
    }
}

/// Sync state of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStatus {
    /// Live entities.
    pub live_count: u64,
    /// Tombstones.
    pub deleted_count: u64,
    /// Server stamp of the most recent change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Sync status for the requested kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Status per kind.
    pub kinds: BTreeMap<EntityKind, KindStatus>,
    /// Current server time.
    pub server_timestamp: DateTime<Utc>,
}
