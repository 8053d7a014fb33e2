//! Test fixtures and server helpers.
//!
//! Client timestamps are expressed as offsets from [`t0`]. The server
//! clock of a [`TestServer`] is a [`ManualClock`] that starts a day later,
//! so client and server instants are never confused in assertions.

use crate::flaky::FlakyStore;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use flowdeck_sync_protocol::{
    BulkSyncPayload, BulkSyncResponse, BulkSyncResult, EntityKind, EntityPayload, FeedRequest,
    FeedResponse, PomodoroTimer, SiteBlocker, SiteCategory, SoundLayer, SoundscapePreset,
    StatusResponse, SyncBatch, SyncOperation,
};
use flowdeck_sync_server::{
    build_router, HandlerContext, ManualClock, MemoryStore, PersistencePolicy, Principal,
    RequestHandler, RetryConfig, ServerConfig, ServerResult,
};
use std::sync::Arc;

/// Reference client instant: 2024-03-01T10:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
        .single()
        .expect("valid reference instant")
}

/// Client instant `offset_secs` seconds after [`t0`].
pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(offset_secs)
}

/// Start of the server clock of a [`TestServer`].
pub fn server_epoch() -> DateTime<Utc> {
    t0() + Duration::days(1)
}

/// Site blocker payload in the social category.
pub fn blocker(url: &str) -> EntityPayload {
    SiteBlocker::new(url, SiteCategory::Social).into()
}

/// Pomodoro timer payload with the classic intervals.
pub fn timer(label: &str) -> EntityPayload {
    PomodoroTimer {
        label: label.to_string(),
        ..PomodoroTimer::default()
    }
    .into()
}

/// Single-layer soundscape payload.
pub fn soundscape(name: &str) -> EntityPayload {
    SoundscapePreset {
        name: name.to_string(),
        layers: vec![SoundLayer {
            sound: "rain".to_string(),
            volume: 0.5,
        }],
    }
    .into()
}

/// Create operation.
pub fn create_op(client_id: &str, payload: EntityPayload, at: DateTime<Utc>) -> SyncOperation {
    SyncOperation::create(client_id, &payload, at)
}

/// Update operation addressed by client id.
pub fn update_op(client_id: &str, payload: EntityPayload, at: DateTime<Utc>) -> SyncOperation {
    SyncOperation::update(client_id, &payload, at)
}

/// Delete operation addressed by client id.
pub fn delete_op(kind: EntityKind, client_id: &str, at: DateTime<Utc>) -> SyncOperation {
    SyncOperation::delete(kind, client_id, at)
}

/// The principal a [`TestServer`] acts as by default.
pub fn test_principal() -> Principal {
    Principal::new("user-1", "laptop")
}

/// Fast persistence policy without retries, so injected failures surface.
pub fn fast_persistence() -> PersistencePolicy {
    PersistencePolicy::new(std::time::Duration::from_secs(2)).with_retry(RetryConfig::no_retry())
}

/// A sync server over a [`FlakyStore`] and a [`ManualClock`].
pub struct TestServer {
    /// Request handler.
    pub handler: Arc<RequestHandler>,
    /// Fault-injecting store wrapper.
    pub store: Arc<FlakyStore>,
    /// Server clock.
    pub clock: Arc<ManualClock>,
    /// Principal used by the helper methods.
    pub principal: Principal,
}

impl TestServer {
    /// Creates a server with default limits and no retries.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default().with_persistence(fast_persistence()))
    }

    /// Creates a server with the given configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(server_epoch()));
        let memory = Arc::new(MemoryStore::with_clock(clock.clone()));
        let store = Arc::new(FlakyStore::new(memory));
        let context = HandlerContext::new(config, store.clone(), clock.clone())
            .expect("valid test configuration");
        Self {
            handler: Arc::new(RequestHandler::new(Arc::new(context))),
            store,
            clock,
            principal: test_principal(),
        }
    }

    /// Returns a view of the same server acting as another session of the
    /// same user.
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            principal: Principal::new(self.principal.user_id.clone(), session_id),
        }
    }

    /// Returns an HTTP router over this server.
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.handler))
    }

    /// Submits a batch as the default principal.
    pub async fn try_bulk_sync(&self, batch: SyncBatch) -> ServerResult<BulkSyncResponse> {
        self.handler.handle_bulk_sync(&self.principal, batch).await
    }

    /// Submits a batch as the default principal, panicking on failure.
    pub async fn bulk_sync(&self, batch: SyncBatch) -> BulkSyncResponse {
        self.try_bulk_sync(batch).await.expect("bulk sync failed")
    }

    /// Submits operations as one batch and returns the result of `kind`.
    pub async fn apply(&self, kind: EntityKind, ops: Vec<SyncOperation>) -> BulkSyncResult {
        self.bulk_sync(SyncBatch::new(ops))
            .await
            .results
            .remove(&kind)
            .unwrap_or_default()
    }

    /// Submits a site-blocker bulk payload.
    pub async fn site_blocker_bulk(&self, payload: BulkSyncPayload) -> BulkSyncResult {
        self.handler
            .handle_site_blocker_bulk(&self.principal, payload)
            .await
            .expect("site blocker bulk failed")
    }

    /// Fetches one feed page.
    pub async fn feed(&self, request: FeedRequest) -> FeedResponse {
        self.handler
            .handle_feed(&self.principal, request)
            .await
            .expect("feed failed")
    }

    /// Fetches sync status for the given kinds.
    pub async fn status(&self, kinds: &[EntityKind]) -> StatusResponse {
        self.handler
            .handle_status(&self.principal, kinds)
            .await
            .expect("status failed")
    }

    /// Pages through the feed from `request` until it is drained.
    ///
    /// Returns every page in order.
    pub async fn drain_feed(&self, mut request: FeedRequest) -> Vec<FeedResponse> {
        let mut pages = Vec::new();
        loop {
            let page = self.feed(request.clone()).await;
            let more = page.has_more;
            request = request.with_cursor(page.resume_cursor());
            pages.push(page);
            if !more {
                return pages;
            }
        }
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}
