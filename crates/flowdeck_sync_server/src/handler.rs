//! Request handlers for sync endpoints.
//!
//! Transport independent: the HTTP layer parses requests into protocol
//! types and hands them to a [`RequestHandler`].

use crate::applier::OperationApplier;
use crate::auth::{AuthConfig, Credentials, Principal, TokenValidator};
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::feed::FeedProvider;
use crate::locks::KeyedLocks;
use crate::persistence::Persistence;
use crate::store::EntityStore;
use flowdeck_sync_protocol::{
    BulkSyncPayload, BulkSyncResponse, BulkSyncResult, EntityKind, FeedRequest, FeedResponse,
    StatusResponse, SyncBatch,
};
use std::sync::Arc;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Store with the persistence policy applied.
    pub persistence: Arc<Persistence>,
    /// Server clock.
    pub clock: Arc<dyn Clock>,
    /// Per-user, per-kind lock scopes.
    pub locks: Arc<KeyedLocks>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a handler context.
    ///
    /// `store` must stamp changes with `clock`; the feed compares those
    /// stamps against readings of the same clock. Fails if authentication
    /// is required but no secret is configured.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self> {
        let validator = match (config.require_auth, &config.auth_secret) {
            (true, Some(secret)) => Some(TokenValidator::new(AuthConfig::new(secret.clone()))),
            (true, None) => {
                return Err(ServerError::Internal(
                    "authentication required but no secret configured".into(),
                ))
            }
            (false, _) => None,
        };

        Ok(Self {
            persistence: Arc::new(Persistence::new(store, config.persistence.clone())),
            clock,
            locks: Arc::new(KeyedLocks::new()),
            validator,
            config,
        })
    }

    /// Returns the token validator when authentication is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
    applier: OperationApplier,
    feed: FeedProvider,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        let applier = OperationApplier::new(
            Arc::clone(&context.persistence),
            Arc::clone(&context.locks),
            context.config.conflict_policy,
        );
        let feed = FeedProvider::new(
            Arc::clone(&context.persistence),
            Arc::clone(&context.clock),
            &context.config,
        );
        Self {
            context,
            applier,
            feed,
        }
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Resolves the caller from request credentials.
    ///
    /// With authentication enabled only a valid bearer token is accepted.
    /// Otherwise identity headers are trusted, falling back to the
    /// development principal.
    pub fn authenticate(&self, credentials: &Credentials) -> ServerResult<Principal> {
        match self.context.validator() {
            Some(validator) => {
                let token = credentials.bearer.as_deref().ok_or_else(|| {
                    ServerError::AuthenticationFailed("missing bearer token".into())
                })?;
                validator.validate_token(token)
            }
            None => {
                let fallback = Principal::development();
                Ok(Principal::new(
                    credentials.user_id.clone().unwrap_or(fallback.user_id),
                    credentials.session_id.clone().unwrap_or(fallback.session_id),
                ))
            }
        }
    }

    /// Handles a bulk sync request.
    ///
    /// `serverTimestamp` is read before the batch is applied. With a
    /// `lastSyncTimestamp` the response also carries every change stamped
    /// after it and at or before `serverTimestamp`, so writes of the
    /// user's other sessions are not skipped by the returned cursor.
    pub async fn handle_bulk_sync(
        &self,
        principal: &Principal,
        batch: SyncBatch,
    ) -> ServerResult<BulkSyncResponse> {
        let batch = batch.validate(self.context.config.max_batch_operations)?;
        tracing::info!(
            user = %principal.user_id,
            operations = batch.len(),
            last_sync = ?batch.last_sync_timestamp,
            "bulk sync"
        );

        let server_timestamp = self.context.clock.now();
        let last_sync = batch.last_sync_timestamp;
        let results = self.applier.apply(principal, batch).await;

        let changes = match last_sync {
            Some(since) => Some(
                self.feed
                    .changes_between(principal, since, server_timestamp)
                    .await?,
            ),
            None => None,
        };
        Ok(BulkSyncResponse {
            results,
            server_timestamp,
            changes,
        })
    }

    /// Handles a site-blocker bulk request.
    ///
    /// The payload has no per-change timestamps, so every change is stamped
    /// with the server receive time.
    pub async fn handle_site_blocker_bulk(
        &self,
        principal: &Principal,
        payload: BulkSyncPayload,
    ) -> ServerResult<BulkSyncResult> {
        let received_at = self.context.clock.now();
        let operations =
            payload.into_operations(received_at, self.context.config.max_batch_operations)?;
        tracing::info!(
            user = %principal.user_id,
            operations = operations.len(),
            "site blocker bulk sync"
        );

        Ok(self
            .applier
            .apply_group(principal, EntityKind::SiteBlocker, operations)
            .await)
    }

    /// Handles a feed request.
    pub async fn handle_feed(
        &self,
        principal: &Principal,
        request: FeedRequest,
    ) -> ServerResult<FeedResponse> {
        Ok(self.feed.feed(principal, &request).await?)
    }

    /// Handles a status request.
    pub async fn handle_status(
        &self,
        principal: &Principal,
        kinds: &[EntityKind],
    ) -> ServerResult<StatusResponse> {
        Ok(self.feed.status(principal, kinds).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use flowdeck_sync_protocol::{
        CreateSiteBlockerInput, DeleteSiteBlockerInput, EntityPayload, ProtocolError, SiteBlocker,
        SiteCategory, SyncOperation,
    };

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let context = HandlerContext::new(config, store, clock).unwrap();
        RequestHandler::new(Arc::new(context))
    }

    fn principal() -> Principal {
        Principal::new("user-1", "laptop")
    }

    #[test]
    fn auth_requires_secret() {
        let mut config = ServerConfig::default();
        config.require_auth = true;
        let result = HandlerContext::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MonotonicClock::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn development_identity() {
        let handler = create_handler(ServerConfig::default());
        assert_eq!(
            handler.authenticate(&Credentials::default()).unwrap(),
            Principal::development()
        );

        let credentials = Credentials {
            user_id: Some("user-9".into()),
            ..Credentials::default()
        };
        let principal = handler.authenticate(&credentials).unwrap();
        assert_eq!(principal.user_id, "user-9");
        assert_eq!(principal.session_id, "default");
    }

    #[test]
    fn bearer_identity() {
        let handler = create_handler(ServerConfig::default().with_auth(b"secret".to_vec()));
        assert!(handler.authenticate(&Credentials::default()).is_err());

        let header_only = Credentials {
            user_id: Some("user-1".into()),
            ..Credentials::default()
        };
        assert!(handler.authenticate(&header_only).is_err());

        let token = handler
            .context()
            .validator()
            .unwrap()
            .create_token(&principal())
            .unwrap();
        assert_eq!(
            handler.authenticate(&Credentials::bearer(token)).unwrap(),
            principal()
        );
    }

    #[tokio::test]
    async fn bulk_sync_round_trip() {
        let handler = create_handler(ServerConfig::default());
        let payload: EntityPayload = SiteBlocker::new("news.example", SiteCategory::News).into();
        let batch = SyncBatch::new(vec![SyncOperation::create("local-1", &payload, Utc::now())]);

        let before = Utc::now();
        let response = handler.handle_bulk_sync(&principal(), batch).await.unwrap();
        assert!(response.server_timestamp >= before);
        assert!(response.changes.is_none());

        let created = response
            .result(EntityKind::SiteBlocker)
            .unwrap()
            .created_for("local-1")
            .unwrap();
        assert!(created.synced_at > response.server_timestamp);
    }

    #[tokio::test]
    async fn bulk_sync_merges_changes_since_last_sync() {
        let handler = create_handler(ServerConfig::default());
        let payload: EntityPayload = SiteBlocker::new("a.com", SiteCategory::News).into();
        let phone = Principal::new("user-1", "phone");
        let since = handler.context().clock.now();
        let other = handler
            .handle_bulk_sync(
                &phone,
                SyncBatch::new(vec![SyncOperation::create("p", &payload, Utc::now())]),
            )
            .await
            .unwrap();
        let other_id = other
            .result(EntityKind::SiteBlocker)
            .unwrap()
            .created_for("p")
            .unwrap()
            .id;

        let batch = SyncBatch::new(vec![SyncOperation::create("l", &payload, Utc::now())])
            .with_last_sync(since);
        let response = handler.handle_bulk_sync(&principal(), batch).await.unwrap();
        let changes = response.changes.unwrap();
        let ids: Vec<_> = changes.kinds[&EntityKind::SiteBlocker]
            .entities
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![other_id]);
        assert_eq!(changes.server_timestamp, response.server_timestamp);
    }

    #[tokio::test]
    async fn oversized_batch_rejected() {
        let handler = create_handler(ServerConfig::default().with_max_batch_operations(1));
        let payload: EntityPayload = SiteBlocker::new("a.com", SiteCategory::News).into();
        let batch = SyncBatch::new(vec![
            SyncOperation::create("a", &payload, Utc::now()),
            SyncOperation::create("b", &payload, Utc::now()),
        ]);

        let err = handler.handle_bulk_sync(&principal(), batch).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Validation(ProtocolError::BatchSize { max: 1, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn site_blocker_bulk() {
        let handler = create_handler(ServerConfig::default());
        let payload = BulkSyncPayload {
            creates: vec![CreateSiteBlockerInput {
                client_id: "ext-1".into(),
                url: "reddit.com".into(),
                category: SiteCategory::Social,
            }],
            deletes: vec![DeleteSiteBlockerInput {
                id: None,
                client_id: Some("ext-1".into()),
            }],
        };

        let result = handler
            .handle_site_blocker_bulk(&principal(), payload)
            .await
            .unwrap();
        let id = result.created_for("ext-1").unwrap().id;
        assert_eq!(result.deleted, vec![id]);

        let status = handler
            .handle_status(&principal(), &[EntityKind::SiteBlocker])
            .await
            .unwrap();
        assert_eq!(status.kinds[&EntityKind::SiteBlocker].deleted_count, 1);
    }
}
