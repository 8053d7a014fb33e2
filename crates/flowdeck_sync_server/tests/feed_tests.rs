//! Integration tests for the change feed and sync status.

use flowdeck_sync_server::ServerConfig;
use flowdeck_testkit::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

async fn create_blockers(server: &TestServer, count: usize) -> Vec<Uuid> {
    let ops = (0..count)
        .map(|i| create_op(&format!("b-{}", i), blocker(&format!("site{}.com", i)), ts(0)))
        .collect();
    let result = server.apply(EntityKind::SiteBlocker, ops).await;
    result.created.iter().map(|c| c.entity.id).collect()
}

fn changed_ids(pages: &[FeedResponse]) -> Vec<Uuid> {
    pages
        .iter()
        .flat_map(|page| page.kinds.values())
        .flat_map(|feed| {
            feed.entities
                .iter()
                .map(|e| e.id)
                .chain(feed.deleted.iter().copied())
        })
        .collect()
}

#[tokio::test]
async fn initial_feed_returns_everything() {
    let server = TestServer::new();
    let ids = create_blockers(&server, 3).await;
    server
        .apply(
            EntityKind::PomodoroTimer,
            vec![create_op("t-1", timer("focus"), ts(0))],
        )
        .await;

    let page = server.feed(FeedRequest::all()).await;
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
    assert_eq!(page.change_count(), 4);
    assert_eq!(page.kinds[&EntityKind::SiteBlocker].entities.len(), 3);
    assert_eq!(page.kinds[&EntityKind::PomodoroTimer].entities.len(), 1);
    assert!(page.kinds[&EntityKind::SoundscapePreset].is_empty());

    let served: Vec<Uuid> = page.kinds[&EntityKind::SiteBlocker]
        .entities
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(served, ids);
}

#[tokio::test]
async fn kinds_filter() {
    let server = TestServer::new();
    create_blockers(&server, 2).await;
    server
        .apply(
            EntityKind::SoundscapePreset,
            vec![create_op("s-1", soundscape("forest"), ts(0))],
        )
        .await;

    let page = server
        .feed(FeedRequest::all().with_kinds([EntityKind::SoundscapePreset]))
        .await;
    assert_eq!(page.kinds.len(), 1);
    assert_eq!(page.kinds[&EntityKind::SoundscapePreset].entities.len(), 1);
}

#[tokio::test]
async fn feed_is_deterministic() {
    let server = TestServer::new();
    create_blockers(&server, 5).await;
    let cursor = FeedCursor::since(server_epoch());

    let first = server
        .feed(FeedRequest::all().with_cursor(cursor).with_limit(3))
        .await;
    let second = server
        .feed(FeedRequest::all().with_cursor(cursor).with_limit(3))
        .await;
    assert_eq!(first.kinds, second.kinds);
    assert_eq!(first.next_cursor, second.next_cursor);
    assert!(second.server_timestamp > first.server_timestamp);
}

#[tokio::test]
async fn resume_from_server_timestamp() {
    let server = TestServer::new();
    create_blockers(&server, 2).await;

    let first = server.feed(FeedRequest::all()).await;
    assert_eq!(first.change_count(), 2);

    // Nothing changed since: the next sweep is empty.
    let cursor = first.resume_cursor();
    let empty = server.feed(FeedRequest::all().with_cursor(cursor)).await;
    assert_eq!(empty.change_count(), 0);

    server
        .apply(
            EntityKind::PomodoroTimer,
            vec![create_op("t-1", timer("focus"), ts(0))],
        )
        .await;
    let next = server.feed(FeedRequest::all().with_cursor(cursor)).await;
    assert_eq!(next.change_count(), 1);
    assert_eq!(next.kinds[&EntityKind::PomodoroTimer].entities.len(), 1);
}

#[tokio::test]
async fn bulk_cursor_keeps_writes_of_other_sessions() {
    let laptop = TestServer::new();
    let phone = laptop.for_session("phone");
    create_blockers(&laptop, 1).await;
    let cursor = laptop
        .drain_feed(FeedRequest::all())
        .await
        .last()
        .unwrap()
        .server_timestamp;

    // Another device writes between the laptop's last feed and its push.
    let written = phone
        .apply(EntityKind::SiteBlocker, vec![create_op("x", blocker("x.com"), ts(0))])
        .await;
    let x = written.created_for("x").unwrap().id;

    let batch =
        SyncBatch::new(vec![create_op("a", blocker("a.com"), ts(1))]).with_last_sync(cursor);
    let response = laptop.bulk_sync(batch).await;
    let own = response
        .result(EntityKind::SiteBlocker)
        .unwrap()
        .created_for("a")
        .unwrap()
        .id;

    let merged = response.changes.as_ref().unwrap();
    assert!(!merged.has_more);
    assert_eq!(changed_ids(std::slice::from_ref(merged)), vec![x]);

    let next = laptop
        .drain_feed(FeedRequest::all().with_cursor(response.resume_cursor()))
        .await;
    assert_eq!(changed_ids(&next), vec![own]);
}

#[tokio::test]
async fn truncated_merged_changes_resume_from_their_cursor() {
    let config = ServerConfig::default()
        .with_persistence(fast_persistence())
        .with_feed_limits(2, 2);
    let laptop = TestServer::with_config(config);
    let phone = laptop.for_session("phone");
    let cursor = laptop.feed(FeedRequest::all()).await.server_timestamp;
    let phone_ids = create_blockers(&phone, 3).await;

    let batch =
        SyncBatch::new(vec![create_op("a", blocker("a.com"), ts(1))]).with_last_sync(cursor);
    let response = laptop.bulk_sync(batch).await;
    let merged = response.changes.as_ref().unwrap();
    assert!(merged.has_more);
    assert_eq!(changed_ids(std::slice::from_ref(merged)), phone_ids[..2].to_vec());

    let rest = laptop
        .drain_feed(FeedRequest::all().with_cursor(response.resume_cursor()))
        .await;
    let own = response
        .result(EntityKind::SiteBlocker)
        .unwrap()
        .created_for("a")
        .unwrap()
        .id;
    assert_eq!(changed_ids(&rest), vec![phone_ids[2], own]);
}

#[tokio::test]
async fn bulk_without_last_sync_merges_nothing() {
    let server = TestServer::new();
    let response = server
        .bulk_sync(SyncBatch::new(vec![create_op("a", blocker("a.com"), ts(0))]))
        .await;
    assert!(response.changes.is_none());

    // The batch's own write is stamped after the response timestamp.
    let page = server
        .feed(FeedRequest::all().with_cursor(FeedCursor::since(response.server_timestamp)))
        .await;
    assert_eq!(page.change_count(), 1);
}

#[tokio::test]
async fn pagination_visits_every_row_once() {
    let server = TestServer::new();
    let ids = create_blockers(&server, 25).await;

    let pages = server.drain_feed(FeedRequest::all().with_limit(10)).await;
    assert_eq!(pages.len(), 3);
    assert!(pages[0].has_more && pages[1].has_more && !pages[2].has_more);
    assert_eq!(pages[2].change_count(), 5);

    let served = changed_ids(&pages);
    assert_eq!(served, ids);
}

#[tokio::test]
async fn page_size_is_clamped() {
    let config = ServerConfig::default()
        .with_persistence(fast_persistence())
        .with_feed_limits(4, 6);
    let server = TestServer::with_config(config);
    create_blockers(&server, 10).await;

    let default_page = server.feed(FeedRequest::all()).await;
    assert_eq!(default_page.change_count(), 4);

    let capped = server.feed(FeedRequest::all().with_limit(100)).await;
    assert_eq!(capped.change_count(), 6);

    let floor = server.feed(FeedRequest::all().with_limit(0)).await;
    assert_eq!(floor.change_count(), 1);
    assert!(floor.has_more);
}

#[tokio::test]
async fn pages_are_ordered_by_sync_time() {
    let server = TestServer::new();
    create_blockers(&server, 4).await;
    server
        .apply(
            EntityKind::SiteBlocker,
            vec![update_op("b-0", blocker("changed.com"), ts(10))],
        )
        .await;

    let pages = server.drain_feed(FeedRequest::all().with_limit(2)).await;
    let rows: Vec<&SyncEntity> = pages
        .iter()
        .flat_map(|p| p.kinds[&EntityKind::SiteBlocker].entities.iter())
        .collect();
    assert_eq!(rows.len(), 4);
    for pair in rows.windows(2) {
        assert!((pair[0].synced_at, pair[0].id) < (pair[1].synced_at, pair[1].id));
    }
    // The updated row moved to the end.
    assert_eq!(rows[3].client_id.as_deref(), Some("b-0"));
}

#[tokio::test]
async fn tombstones_are_served_as_deleted_ids() {
    let server = TestServer::new();
    let ids = create_blockers(&server, 2).await;
    let checkpoint = server.feed(FeedRequest::all()).await.resume_cursor();

    server
        .apply(
            EntityKind::SiteBlocker,
            vec![delete_op(EntityKind::SiteBlocker, "b-1", ts(5))],
        )
        .await;

    let page = server.feed(FeedRequest::all().with_cursor(checkpoint)).await;
    let blockers = &page.kinds[&EntityKind::SiteBlocker];
    assert!(blockers.entities.is_empty());
    assert_eq!(blockers.deleted, vec![ids[1]]);

    // A fresh client only learns the live row and the tombstone id.
    let full = server.feed(FeedRequest::all()).await;
    let blockers = &full.kinds[&EntityKind::SiteBlocker];
    assert_eq!(blockers.entities.len(), 1);
    assert_eq!(blockers.deleted, vec![ids[1]]);
}

#[tokio::test]
async fn status_counts() {
    let server = TestServer::new();
    create_blockers(&server, 3).await;
    server
        .apply(
            EntityKind::SiteBlocker,
            vec![delete_op(EntityKind::SiteBlocker, "b-0", ts(1))],
        )
        .await;

    let status = server.status(&[]).await;
    assert_eq!(status.kinds.len(), EntityKind::ALL.len());

    let blockers = &status.kinds[&EntityKind::SiteBlocker];
    assert_eq!(blockers.live_count, 2);
    assert_eq!(blockers.deleted_count, 1);
    let last = blockers.last_synced_at.unwrap();
    assert!(last < status.server_timestamp);

    let timers = &status.kinds[&EntityKind::PomodoroTimer];
    assert_eq!(timers.live_count, 0);
    assert!(timers.last_synced_at.is_none());
}

#[tokio::test]
async fn store_failure_surfaces_as_error() {
    let server = TestServer::new();
    server.store.fail_next(
        StoreCall::ChangedSince,
        1,
        StoreError::Unavailable("maintenance".into()),
    );

    let err = server
        .handler
        .handle_feed(&server.principal, FeedRequest::all())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_change_is_lost_under_concurrent_writes() {
    let server = Arc::new(TestServer::new());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let server = Arc::clone(&server);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut ids = Vec::new();
            for batch in 0..20 {
                let ops = (0..10)
                    .map(|i| {
                        let client_id = format!("w-{}-{}", batch, i);
                        create_op(&client_id, blocker("busy.com"), ts(0))
                    })
                    .collect();
                let result = server.apply(EntityKind::SiteBlocker, ops).await;
                ids.extend(result.created.iter().map(|c| c.entity.id));
                tokio::task::yield_now().await;
            }
            done.store(true, Ordering::SeqCst);
            ids
        })
    };

    let mut seen = Vec::new();
    let mut request = FeedRequest::all().with_limit(7);
    loop {
        let finished = done.load(Ordering::SeqCst);
        let page = server.feed(request.clone()).await;
        seen.extend(changed_ids(std::slice::from_ref(&page)));
        request = request.with_cursor(page.resume_cursor());
        if finished && !page.has_more {
            break;
        }
        tokio::task::yield_now().await;
    }

    let written = writer.await.unwrap();
    let unique: HashSet<Uuid> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a change was served twice");
    assert_eq!(unique, written.into_iter().collect::<HashSet<_>>());
}
