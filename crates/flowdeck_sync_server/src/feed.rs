//! Cursor-based change feed.
//!
//! `serverTimestamp` is read from the clock before the store is queried,
//! and the query only returns rows stamped at or before it. Since the clock
//! is strictly monotonic and the store stamps under its write lock, a
//! change is either on this page (or a later page of this sweep) or has a
//! stamp greater than `serverTimestamp` and shows up on the next sweep.
//! Nothing is lost and nothing is returned twice.

use crate::auth::Principal;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::persistence::Persistence;
use crate::store::StoreResult;
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{
    EntityKind, FeedCursor, FeedRequest, FeedResponse, KindFeed, StatusResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serves incremental changes and sync status.
pub struct FeedProvider {
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    default_limit: u32,
    max_limit: u32,
}

impl FeedProvider {
    /// Creates a provider with the page limits of `config`.
    pub fn new(
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            persistence,
            clock,
            default_limit: config.default_feed_limit,
            max_limit: config.max_feed_limit,
        }
    }

    fn page_size(&self, requested: Option<u32>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1)) as usize
    }

    /// Returns one page of changes after the request cursor.
    #[tracing::instrument(skip(self, principal, request), fields(user = %principal.user_id))]
    pub async fn feed(
        &self,
        principal: &Principal,
        request: &FeedRequest,
    ) -> StoreResult<FeedResponse> {
        let limit = self.page_size(request.limit);
        let server_timestamp = self.clock.now();
        let response = self
            .page(principal, request, limit, server_timestamp)
            .await?;
        tracing::debug!(
            changes = response.change_count(),
            has_more = response.has_more,
            since = ?request.cursor.map(|c| c.since),
            "served feed page"
        );
        Ok(response)
    }

    /// Returns changes of every kind stamped after `since` and at or before
    /// `until`, as one page of at most the maximum page size.
    ///
    /// `until` must be a reading of the server clock.
    pub async fn changes_between(
        &self,
        principal: &Principal,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<FeedResponse> {
        let request = FeedRequest::all().with_cursor(FeedCursor::since(since));
        let limit = self.page_size(Some(self.max_limit));
        self.page(principal, &request, limit, until).await
    }

    async fn page(
        &self,
        principal: &Principal,
        request: &FeedRequest,
        limit: usize,
        server_timestamp: DateTime<Utc>,
    ) -> StoreResult<FeedResponse> {
        let kinds = request.resolved_kinds();
        let mut rows = self
            .persistence
            .changed_since(
                &principal.user_id,
                &kinds,
                request.cursor,
                server_timestamp,
                limit + 1,
            )
            .await?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|e| FeedCursor::after(e.synced_at, e.id))
        } else {
            None
        };

        let mut grouped: BTreeMap<EntityKind, KindFeed> =
            kinds.iter().map(|k| (*k, KindFeed::default())).collect();
        for entity in rows {
            let feed = grouped.entry(entity.kind).or_default();
            if entity.is_deleted() {
                feed.deleted.push(entity.id);
            } else {
                feed.entities.push(entity);
            }
        }

        Ok(FeedResponse {
            kinds: grouped,
            server_timestamp,
            has_more,
            next_cursor,
        })
    }

    /// Returns counts and last change stamps per kind.
    pub async fn status(
        &self,
        principal: &Principal,
        kinds: &[EntityKind],
    ) -> StoreResult<StatusResponse> {
        let kinds = FeedRequest::all().with_kinds(kinds.iter().copied()).resolved_kinds();
        let server_timestamp = self.clock.now();

        let mut statuses = BTreeMap::new();
        for kind in kinds {
            let status = self.persistence.stats(&principal.user_id, kind).await?;
            statuses.insert(kind, status);
        }

        Ok(StatusResponse {
            kinds: statuses,
            server_timestamp,
        })
    }
}
