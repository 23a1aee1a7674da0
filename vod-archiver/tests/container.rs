mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{FakeCatalog, FakeChatRecorder, FakeFetcher, FakeLiveStatus, at, eventually, meta, setup_db};
use vod_archiver::config::ArchiverConfig;
use vod_archiver::database::repositories::{
    RecordingRepository, SqlxChatRepository, SqlxRecordingRepository,
};
use vod_archiver::services::{Collaborators, ServiceContainer};

fn config(output_dir: &std::path::Path) -> ArchiverConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("CHANNEL_LOGIN", "SomeChannel".to_string()),
        ("HELIX_CLIENT_ID", "client".to_string()),
        ("MAX_CONCURRENT_DOWNLOADS", "2".to_string()),
        ("TICK_INTERVAL_SECS", "1".to_string()),
        ("OUTPUT_DIR", output_dir.display().to_string()),
    ]);
    ArchiverConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

#[tokio::test]
async fn test_container_archives_catalog_and_shuts_down() {
    let (dir, pool) = setup_db().await;
    let output = dir.path().join("downloads");
    let config = config(&output);
    assert_eq!(config.channel, common::CHANNEL);

    let fetcher = Arc::new(FakeFetcher::succeeding(&output));
    let chat = Arc::new(FakeChatRecorder::new(
        Arc::new(SqlxChatRepository::new(pool.clone())),
        vec![],
    ));
    let collaborators = Collaborators {
        catalog: Arc::new(FakeCatalog::new(
            vec![meta("v2", at(3600)), meta("v1", at(0))],
            10,
        )),
        live_status: Arc::new(FakeLiveStatus::default()),
        fetcher: fetcher.clone(),
        publisher: None,
        chat,
    };

    let container = ServiceContainer::with_collaborators(pool.clone(), config, collaborators)
        .await
        .unwrap();
    container.start();

    let repo = SqlxRecordingRepository::new(pool.clone());
    eventually("both recordings to be fetched", || async {
        let rows = repo.list_recordings(common::CHANNEL, 10).await.unwrap();
        rows.len() == 2 && rows.iter().all(|r| r.fetch_state == "completed")
    })
    .await;

    let snapshot = container.status.snapshot().await.unwrap();
    assert_eq!(snapshot.capacity, 2);
    assert!(snapshot.pending_by_priority.is_empty());
    assert!(snapshot.in_progress.is_empty());
    assert!(snapshot.ema.fetch_secs.is_some());

    container.shutdown().await;
    assert!(container.cancellation_token().is_cancelled());
    assert_eq!(container.orchestrator.in_flight(), 0);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}
