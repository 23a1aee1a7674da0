mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{CHANNEL, FakeCatalog, at, meta, setup_db};
use vod_archiver::database::DbPool;
use vod_archiver::database::models::{NewChatMessage, RecordingMetadata};
use vod_archiver::database::repositories::{
    ChatRepository, MergeOutcome, RecordingRepository, SqlxChatRepository,
    SqlxRecordingRepository,
};
use vod_archiver::domain::PlaceholderId;
use vod_archiver::live::{ReconcileConfig, ReconcileOutcome, ReconcileRequest, ReconciliationEngine};

struct Fixture {
    _dir: tempfile::TempDir,
    pool: DbPool,
    recordings: SqlxRecordingRepository,
    chat: SqlxChatRepository,
    placeholder: PlaceholderId,
}

/// A placeholder started at `at(0)` with chat at the given offsets.
async fn fixture(chat_offsets: &[i64]) -> Fixture {
    let (dir, pool) = setup_db().await;
    let recordings = SqlxRecordingRepository::new(pool.clone());
    let chat = SqlxChatRepository::new(pool.clone());

    let placeholder = PlaceholderId::for_start(at(0));
    recordings
        .create_placeholder(CHANNEL, &placeholder, at(0).timestamp_millis())
        .await
        .unwrap();

    let messages: Vec<NewChatMessage> = chat_offsets
        .iter()
        .map(|offset| {
            NewChatMessage::observed(
                placeholder.as_str(),
                "viewer",
                format!("at {}", offset),
                at(*offset),
                at(0),
            )
        })
        .collect();
    chat.insert_batch(&messages).await.unwrap();

    Fixture {
        _dir: dir,
        pool,
        recordings,
        chat,
        placeholder,
    }
}

fn engine(pool: &DbPool, candidates: Vec<RecordingMetadata>, config: ReconcileConfig) -> ReconciliationEngine {
    ReconciliationEngine::new(
        CHANNEL,
        config,
        Arc::new(FakeCatalog::new(candidates, 100)),
        pool.clone(),
    )
}

fn fast_config(window_secs: u64) -> ReconcileConfig {
    ReconcileConfig {
        initial_delay_secs: 0,
        poll_interval_secs: 1,
        window_secs,
        match_tolerance_secs: 600,
    }
}

fn request(placeholder: &PlaceholderId) -> ReconcileRequest {
    ReconcileRequest {
        placeholder: placeholder.clone(),
        nominal_start: at(0),
        offline_at: at(7200),
    }
}

async fn rel_timestamps(chat: &SqlxChatRepository, recording_id: &str) -> Vec<f64> {
    chat.list_for_recording(recording_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.rel_timestamp)
        .collect()
}

#[tokio::test]
async fn test_exact_start_match() {
    let f = fixture(&[10, 300]).await;
    let engine = engine(&f.pool, vec![meta("v1", at(0))], fast_config(0));

    let outcome = engine.try_once(&request(&f.placeholder)).await.unwrap();
    assert_eq!(
        outcome,
        Some(MergeOutcome::Merged {
            real_id: "v1".to_string(),
            delta_secs: 0.0,
            messages_moved: 2,
        })
    );
    assert_eq!(rel_timestamps(&f.chat, "v1").await, vec![10.0, 300.0]);
    assert!(f.recordings.find_recording(f.placeholder.as_str()).await.unwrap().is_none());
    assert_eq!(f.chat.count_for_recording(f.placeholder.as_str()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_archive_started_after_placeholder() {
    let f = fixture(&[10, 300]).await;
    let engine = engine(&f.pool, vec![meta("v1", at(120))], fast_config(0));

    engine.try_once(&request(&f.placeholder)).await.unwrap();
    assert_eq!(rel_timestamps(&f.chat, "v1").await, vec![-110.0, 180.0]);

    let real = f.recordings.get_recording("v1").await.unwrap();
    assert!(!real.is_placeholder);
    assert_eq!(real.started_at, at(120).timestamp_millis());
}

#[tokio::test]
async fn test_archive_started_before_placeholder() {
    let f = fixture(&[60]).await;
    let engine = engine(&f.pool, vec![meta("v1", at(-60))], fast_config(0));

    let outcome = engine.try_once(&request(&f.placeholder)).await.unwrap();
    assert!(matches!(
        outcome,
        Some(MergeOutcome::Merged { delta_secs, .. }) if delta_secs == -60.0
    ));
    assert_eq!(rel_timestamps(&f.chat, "v1").await, vec![120.0]);
}

#[tokio::test]
async fn test_no_candidate_in_range_leaves_everything_unchanged() {
    let f = fixture(&[10, 20]).await;
    let engine = engine(
        &f.pool,
        vec![meta("late", at(660)), meta("early", at(-660))],
        fast_config(0),
    );

    assert_eq!(engine.try_once(&request(&f.placeholder)).await.unwrap(), None);

    let outcome = engine
        .reconcile(request(&f.placeholder), CancellationToken::new())
        .await;
    assert_eq!(outcome, ReconcileOutcome::Expired);

    assert!(f.recordings.find_recording(f.placeholder.as_str()).await.unwrap().is_some());
    assert!(f.recordings.find_recording("late").await.unwrap().is_none());
    assert!(f.recordings.find_recording("early").await.unwrap().is_none());
    assert_eq!(
        rel_timestamps(&f.chat, f.placeholder.as_str()).await,
        vec![10.0, 20.0]
    );
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let f = fixture(&[10]).await;
    let engine = engine(&f.pool, vec![meta("v1", at(30))], fast_config(0));
    let real = meta("v1", at(30));

    let first = engine.merge(&f.placeholder, &real).await.unwrap();
    assert!(matches!(first, MergeOutcome::Merged { messages_moved: 1, .. }));

    let second = engine.merge(&f.placeholder, &real).await.unwrap();
    assert_eq!(second, MergeOutcome::AlreadyReconciled);
    assert_eq!(rel_timestamps(&f.chat, "v1").await, vec![-20.0]);

    let outcome = engine
        .reconcile(request(&f.placeholder), CancellationToken::new())
        .await;
    assert_eq!(outcome, ReconcileOutcome::AlreadyReconciled);
}

#[tokio::test]
async fn test_bulk_chat_moves_in_one_merge() {
    let offsets: Vec<i64> = (0..100).collect();
    let f = fixture(&offsets).await;
    let engine = engine(&f.pool, vec![meta("v1", at(5))], fast_config(0));

    let outcome = engine.try_once(&request(&f.placeholder)).await.unwrap();
    assert!(matches!(
        outcome,
        Some(MergeOutcome::Merged { messages_moved: 100, .. })
    ));
    assert_eq!(f.chat.count_for_recording("v1").await.unwrap(), 100);
    assert_eq!(f.chat.count_for_recording(f.placeholder.as_str()).await.unwrap(), 0);

    let rels = rel_timestamps(&f.chat, "v1").await;
    let expected: Vec<f64> = offsets.iter().map(|o| (*o - 5) as f64).collect();
    assert_eq!(rels, expected);
}

#[tokio::test]
async fn test_tie_break_across_both_sides() {
    let f = fixture(&[100]).await;
    let candidates = vec![
        meta("before-far", at(-400)),
        meta("before-near", at(-30)),
        meta("after-near", at(60)),
        meta("after-far", at(240)),
        meta("out-of-range", at(900)),
    ];
    let engine = engine(&f.pool, candidates, fast_config(0));

    let outcome = engine.try_once(&request(&f.placeholder)).await.unwrap();
    assert!(matches!(
        outcome,
        Some(MergeOutcome::Merged { ref real_id, .. }) if real_id == "after-far"
    ));
    assert_eq!(rel_timestamps(&f.chat, "after-far").await, vec![-140.0]);
}

#[tokio::test]
async fn test_merge_keeps_fetch_state_of_known_recording() {
    let f = fixture(&[10]).await;
    f.recordings
        .upsert_from_catalog(CHANNEL, &meta("v1", at(0)))
        .await
        .unwrap();
    f.recordings.set_priority("v1", 50).await.unwrap();

    let engine = engine(&f.pool, vec![meta("v1", at(0))], fast_config(0));
    engine.try_once(&request(&f.placeholder)).await.unwrap();

    let row = f.recordings.get_recording("v1").await.unwrap();
    assert_eq!(row.priority, 50);
    assert_eq!(row.fetch_state, "pending");
}

#[tokio::test]
async fn test_reconcile_cancelled_during_initial_delay() {
    let f = fixture(&[]).await;
    let engine = engine(&f.pool, vec![meta("v1", at(0))], ReconcileConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.reconcile(request(&f.placeholder), cancel).await;
    assert_eq!(outcome, ReconcileOutcome::Cancelled);
    assert!(f.recordings.find_recording(f.placeholder.as_str()).await.unwrap().is_some());
}
