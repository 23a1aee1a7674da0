mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{CHANNEL, at, meta, setup_db};
use vod_archiver::database::repositories::{RecordingRepository, SqlxRecordingRepository};
use vod_archiver::domain::PlaceholderId;
use vod_archiver::engine::JobSelector;

#[tokio::test]
async fn test_highest_priority_selected_first() {
    let (_dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));

    for (id, priority) in [("low", 0), ("mid", 10), ("high", 100)] {
        repo.upsert_from_catalog(CHANNEL, &meta(id, at(0))).await.unwrap();
        repo.set_priority(id, priority).await.unwrap();
    }

    let selector = JobSelector::new(CHANNEL, repo.clone(), Duration::from_secs(600));
    let mut order = Vec::new();
    while let Some(next) = selector.select_next().await.unwrap() {
        assert!(repo.claim(&next.id).await.unwrap());
        order.push(next.id);
    }
    assert_eq!(order, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_older_recording_wins_priority_tie() {
    let (_dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));
    repo.upsert_from_catalog(CHANNEL, &meta("newer", at(3600))).await.unwrap();
    repo.upsert_from_catalog(CHANNEL, &meta("older", at(0))).await.unwrap();

    let selector = JobSelector::new(CHANNEL, repo, Duration::from_secs(600));
    assert_eq!(selector.select_next().await.unwrap().unwrap().id, "older");
}

#[tokio::test]
async fn test_failed_recording_waits_out_cooldown() {
    let (_dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));
    repo.upsert_from_catalog(CHANNEL, &meta("flaky", at(0))).await.unwrap();
    repo.upsert_from_catalog(CHANNEL, &meta("steady", at(60))).await.unwrap();
    repo.set_priority("flaky", 100).await.unwrap();

    assert!(repo.claim("flaky").await.unwrap());
    repo.record_fetch_failure("flaky", "connection reset", 3)
        .await
        .unwrap();

    let selector = JobSelector::new(CHANNEL, repo.clone(), Duration::from_secs(600));
    let now = Utc::now();
    assert_eq!(
        selector.select_next_at(now).await.unwrap().unwrap().id,
        "steady"
    );

    let later = now + chrono::Duration::seconds(601);
    assert_eq!(
        selector.select_next_at(later).await.unwrap().unwrap().id,
        "flaky"
    );

    let row = repo.get_recording("flaky").await.unwrap();
    assert_eq!(row.retry_count, 3);
    assert_eq!(row.last_error.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn test_placeholders_and_claimed_rows_not_selected() {
    let (_dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));
    let placeholder = PlaceholderId::for_start(at(0));
    repo.create_placeholder(CHANNEL, &placeholder, at(0).timestamp_millis())
        .await
        .unwrap();
    repo.upsert_from_catalog(CHANNEL, &meta("busy", at(0))).await.unwrap();
    assert!(repo.claim("busy").await.unwrap());

    let selector = JobSelector::new(CHANNEL, repo, Duration::from_secs(600));
    assert!(selector.select_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_other_channels_ignored() {
    let (_dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));
    repo.upsert_from_catalog("elsewhere", &meta("foreign", at(0)))
        .await
        .unwrap();

    let selector = JobSelector::new(CHANNEL, repo, Duration::from_secs(600));
    assert!(selector.select_next().await.unwrap().is_none());
}
