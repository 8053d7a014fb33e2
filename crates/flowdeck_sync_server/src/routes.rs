//! HTTP routes.
//!
//! | method | path | body / query | response |
//! |---|---|---|---|
//! | `GET` | `/health` | | `{status, version}` |
//! | `POST` | `/v1/sync/bulk` | `SyncBatch` | `BulkSyncResponse` |
//! | `GET` | `/v1/sync/status` | `entities[]` | `StatusResponse` |
//! | `GET` | `/v1/sync/feed/bulk` | `entities[]`, `since`, `afterId`, `limit` | `FeedResponse` |
//! | `POST` | `/v1/site-blocker/bulk` | `BulkSyncPayload` | `BulkSyncResult` |
//!
//! Query strings are form-decoded, so a `+` in a `since` offset must be
//! sent as `%2B`; a bare `+` decodes to a space and the cursor is rejected.
//! A request running past the configured timeout is answered with `503`.

use crate::auth::Credentials;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use chrono::{DateTime, Utc};
use flowdeck_sync_protocol::{
    BulkSyncPayload, BulkSyncResponse, BulkSyncResult, EntityKind, FeedCursor, FeedRequest,
    FeedResponse, ProtocolError, StatusResponse, SyncBatch,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Header carrying the user id when authentication is disabled.
pub const USER_HEADER: &str = "x-flowdeck-user";

/// Header carrying the session id when authentication is disabled.
pub const SESSION_HEADER: &str = "x-flowdeck-session";

/// Health check body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Server version.
    pub version: String,
}

/// Builds the HTTP router.
pub fn build_router(handler: Arc<RequestHandler>) -> Router {
    let timeout = handler.context().config.request_timeout;
    let router = Router::new()
        .route("/health", get(health))
        .route("/v1/sync/bulk", post(bulk_sync))
        .route("/v1/sync/status", get(sync_status))
        .route("/v1/sync/feed/bulk", get(sync_feed))
        .route("/v1/site-blocker/bulk", post(site_blocker_bulk));
    with_request_timeout(router, timeout)
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

fn with_request_timeout<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(request_failed))
            .layer(TimeoutLayer::new(timeout)),
    )
}

async fn request_failed(err: BoxError) -> ServerError {
    if err.is::<Elapsed>() {
        ServerError::Timeout("request timed out".into())
    } else {
        ServerError::Internal(err.to_string())
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn bulk_sync(
    State(handler): State<Arc<RequestHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<BulkSyncResponse>> {
    let principal = handler.authenticate(&credentials(&headers))?;
    let batch: SyncBatch = parse_body(&body)?;
    Ok(Json(handler.handle_bulk_sync(&principal, batch).await?))
}

async fn site_blocker_bulk(
    State(handler): State<Arc<RequestHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<BulkSyncResult>> {
    let principal = handler.authenticate(&credentials(&headers))?;
    let payload: BulkSyncPayload = parse_body(&body)?;
    Ok(Json(
        handler.handle_site_blocker_bulk(&principal, payload).await?,
    ))
}

async fn sync_status(
    State(handler): State<Arc<RequestHandler>>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ServerResult<Json<StatusResponse>> {
    let principal = handler.authenticate(&credentials(&headers))?;
    let params = QueryParams::from_query(query)?;
    Ok(Json(handler.handle_status(&principal, &params.kinds).await?))
}

async fn sync_feed(
    State(handler): State<Arc<RequestHandler>>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ServerResult<Json<FeedResponse>> {
    let principal = handler.authenticate(&credentials(&headers))?;
    let request = QueryParams::from_query(query)?.into_feed_request()?;
    Ok(Json(handler.handle_feed(&principal, request).await?))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::InvalidRequest(format!("malformed request body: {}", e)))
}

fn credentials(headers: &HeaderMap) -> Credentials {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let bearer = text(header::AUTHORIZATION.as_str()).and_then(|value| {
        let (scheme, token) = value.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim().to_string())
    });

    Credentials {
        bearer,
        user_id: text(USER_HEADER),
        session_id: text(SESSION_HEADER),
    }
}

/// Query parameters shared by the status and feed endpoints.
#[derive(Debug, Default, PartialEq)]
struct QueryParams {
    kinds: Vec<EntityKind>,
    since: Option<DateTime<Utc>>,
    after_id: Option<Uuid>,
    limit: Option<u32>,
}

impl QueryParams {
    fn from_query(
        query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    ) -> ServerResult<Self> {
        let Query(pairs) = query
            .map_err(|e| ServerError::InvalidRequest(format!("malformed query: {}", e)))?;
        Self::from_pairs(pairs)
    }

    /// Folds decoded query pairs.
    ///
    /// `entities[]` may repeat, and `entities` may hold a comma separated
    /// list. Unknown keys are ignored.
    fn from_pairs(pairs: Vec<(String, String)>) -> ServerResult<Self> {
        let mut params = QueryParams::default();
        for (key, value) in pairs {
            match key.as_str() {
                "entities[]" | "entities" => {
                    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                        params.kinds.push(name.parse()?);
                    }
                }
                "since" => {
                    let since = DateTime::parse_from_rfc3339(&value).map_err(|e| {
                        ProtocolError::InvalidCursor(format!("since `{}`: {}", value, e))
                    })?;
                    params.since = Some(since.with_timezone(&Utc));
                }
                "afterId" => {
                    let id = Uuid::parse_str(&value).map_err(|e| {
                        ProtocolError::InvalidCursor(format!("afterId `{}`: {}", value, e))
                    })?;
                    params.after_id = Some(id);
                }
                "limit" => {
                    let limit = value.parse().map_err(|_| {
                        ProtocolError::invalid_field("limit", "must be a positive integer")
                    })?;
                    params.limit = Some(limit);
                }
                _ => {}
            }
        }
        Ok(params)
    }

    fn into_feed_request(self) -> ServerResult<FeedRequest> {
        let cursor = match (self.since, self.after_id) {
            (Some(since), after_id) => Some(FeedCursor { since, after_id }),
            (None, Some(_)) => {
                return Err(ProtocolError::InvalidCursor("afterId requires since".into()).into())
            }
            (None, None) => None,
        };
        Ok(FeedRequest {
            kinds: self.kinds,
            cursor,
            limit: self.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderValue, Request, StatusCode, Uri};
    use chrono::TimeZone;
    use tower::ServiceExt;

    fn parse(query: &str) -> ServerResult<QueryParams> {
        let uri: Uri = format!("/v1/sync/feed/bulk?{}", query).parse().unwrap();
        QueryParams::from_query(Query::try_from_uri(&uri))
    }

    #[test]
    fn parse_entities_forms() {
        let params = parse("entities%5B%5D=site_blocker&entities%5B%5D=pomodoro_timer").unwrap();
        assert_eq!(
            params.kinds,
            vec![EntityKind::SiteBlocker, EntityKind::PomodoroTimer]
        );

        let params = parse("entities=soundscape_preset,site_blocker").unwrap();
        assert_eq!(
            params.kinds,
            vec![EntityKind::SoundscapePreset, EntityKind::SiteBlocker]
        );

        assert_eq!(parse("").unwrap(), QueryParams::default());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = parse("entities%5B%5D=calendar_event").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn parse_cursor() {
        let params = parse(concat!(
            "since=2024-03-01T10:00:00%2B00:00",
            "&afterId=67e55044-10b1-426f-9247-bb680e5fe0c8",
            "&limit=25",
        ))
        .unwrap();
        assert_eq!(
            params.since,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert!(params.after_id.is_some());
        assert_eq!(params.limit, Some(25));

        let request = params.into_feed_request().unwrap();
        assert!(request.cursor.unwrap().after_id.is_some());
    }

    #[test]
    fn percent_encoded_since() {
        let params = parse("since=2024-03-01T10%3A00%3A00.123456Z").unwrap();
        assert_eq!(params.since.unwrap().timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn bare_plus_in_offset_is_rejected() {
        let err = parse("since=2024-03-01T10:00:00+01:00").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn bad_cursor_values() {
        let queries = [
            "since=yesterday",
            "afterId=42",
            "limit=-1",
            "afterId=67e55044-10b1-426f-9247-bb680e5fe0c8",
        ];
        for query in queries {
            let result = parse(query).and_then(|p| p.into_feed_request());
            assert!(result.is_err(), "accepted {}", query);
        }
    }

    #[tokio::test]
    async fn slow_requests_time_out_as_unavailable() {
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let router = with_request_timeout(slow, Duration::from_millis(10));

        let response = router
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: crate::error::ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "timeout");
    }

    #[test]
    fn extracts_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc:def"));
        headers.insert(USER_HEADER, HeaderValue::from_static("user-1"));

        let credentials = credentials(&headers);
        assert_eq!(credentials.bearer.as_deref(), Some("abc:def"));
        assert_eq!(credentials.user_id.as_deref(), Some("user-1"));
        assert_eq!(credentials.session_id, None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(super::credentials(&headers).bearer, None);
    }
}
