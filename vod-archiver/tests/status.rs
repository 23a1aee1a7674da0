mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CHANNEL, at, meta, setup_db};
use vod_archiver::Error;
use vod_archiver::database::models::{CircuitState, PriorityCount};
use vod_archiver::database::repositories::{
    MemoryStateStore, RecordingRepository, SqlxRecordingRepository, StateStore,
};
use vod_archiver::domain::FetchState;
use vod_archiver::engine::{BreakerConfig, CircuitBreaker, ConcurrencyLimiter, EmaTracker, JobSelector};
use vod_archiver::services::StatusService;

struct Harness {
    _dir: tempfile::TempDir,
    repo: Arc<SqlxRecordingRepository>,
    limiter: ConcurrencyLimiter,
    service: StatusService,
}

async fn harness() -> Harness {
    let (dir, pool) = setup_db().await;
    let repo = Arc::new(SqlxRecordingRepository::new(pool));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let breaker = Arc::new(CircuitBreaker::load(CHANNEL, BreakerConfig::default(), store.clone()).await);
    let stats = Arc::new(EmaTracker::load(CHANNEL, store).await);
    let limiter = ConcurrencyLimiter::new(2);

    let service = StatusService::new(CHANNEL, repo.clone(), breaker, limiter.clone(), stats);
    Harness {
        _dir: dir,
        repo,
        limiter,
        service,
    }
}

#[tokio::test]
async fn test_snapshot_groups_pending_by_priority() {
    let h = harness().await;
    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        h.repo
            .upsert_from_catalog(CHANNEL, &meta(id, at(i as i64 * 60)))
            .await
            .unwrap();
    }
    h.service.set_priority("a", 10).await.unwrap();
    h.service.set_priority("b", 10).await.unwrap();
    assert!(h.repo.claim("d").await.unwrap());
    h.repo.update_progress("d", 250, 1000).await.unwrap();

    let snapshot = h.service.snapshot().await.unwrap();
    assert_eq!(snapshot.channel, CHANNEL);
    assert_eq!(
        snapshot.pending_by_priority,
        vec![
            PriorityCount { priority: 10, count: 2 },
            PriorityCount { priority: 0, count: 1 },
        ]
    );

    assert_eq!(snapshot.in_progress.len(), 1);
    let progress = &snapshot.in_progress[0];
    assert_eq!(progress.id, "d");
    assert_eq!(progress.fetch_state, FetchState::Downloading);
    assert_eq!(progress.ratio, Some(0.25));

    assert_eq!(snapshot.breaker.state, CircuitState::Closed);
    assert_eq!(snapshot.ema.fetch_secs, None);
}

#[tokio::test]
async fn test_snapshot_reports_slot_usage() {
    let h = harness().await;
    let snapshot = h.service.snapshot().await.unwrap();
    assert_eq!(snapshot.capacity, 2);
    assert_eq!(snapshot.active_slots, 0);

    let _slot = h.limiter.try_acquire().unwrap();
    let snapshot = h.service.snapshot().await.unwrap();
    assert_eq!(snapshot.active_slots, 1);
}

#[tokio::test]
async fn test_priority_change_applies_to_next_selection() {
    let h = harness().await;
    h.repo.upsert_from_catalog(CHANNEL, &meta("old", at(0))).await.unwrap();
    h.repo.upsert_from_catalog(CHANNEL, &meta("new", at(3600))).await.unwrap();

    let selector = JobSelector::new(CHANNEL, h.repo.clone(), Duration::from_secs(600));
    assert_eq!(selector.select_next().await.unwrap().unwrap().id, "old");

    h.service.set_priority("new", 5).await.unwrap();
    assert_eq!(selector.select_next().await.unwrap().unwrap().id, "new");
}

#[tokio::test]
async fn test_controls_on_unknown_recording_fail() {
    let h = harness().await;
    assert!(matches!(
        h.service.set_priority("missing", 1).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        h.service.set_skip_publish("missing", true).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_skip_publish_is_persisted() {
    let h = harness().await;
    h.repo.upsert_from_catalog(CHANNEL, &meta("a", at(0))).await.unwrap();
    h.service.set_skip_publish("a", true).await.unwrap();
    assert!(h.repo.get_recording("a").await.unwrap().skip_publish);
}
