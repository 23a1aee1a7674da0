#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vod_archiver::catalog::{CatalogPage, CatalogSource, LiveStatus, LiveStatusSource};
use vod_archiver::chat::ChatRecorder;
use vod_archiver::database::models::{NewChatMessage, RecordingMetadata};
use vod_archiver::database::repositories::ChatRepository;
use vod_archiver::database::{DbPool, init_pool, run_migrations};
use vod_archiver::executors::{
    FetchExecutor, FetchProgress, FetchRequest, ProgressCallback, PublishExecutor,
};
use vod_archiver::{Error, FailureClass, Result};

pub const CHANNEL: &str = "somechannel";

pub async fn setup_db() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("archiver.db").display());
    let pool = init_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (dir, pool)
}

/// Whole-second timestamp `offset_secs` from a fixed base.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

pub fn meta(id: &str, started_at: DateTime<Utc>) -> RecordingMetadata {
    RecordingMetadata::new(id, format!("Recording {}", id), started_at, 3600)
}

/// Poll `check` until it returns true, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub fn error_for(class: FailureClass) -> Error {
    match class {
        FailureClass::Transient => Error::transient("connection reset"),
        FailureClass::Unauthorized => Error::unauthorized("HTTP 401"),
        FailureClass::Storage => Error::storage("No space left on device"),
        FailureClass::Cancelled => Error::Cancelled,
        FailureClass::Permanent => Error::validation("bad input"),
    }
}

/// Catalog serving a fixed newest-first list in pages.
pub struct FakeCatalog {
    recordings: Mutex<Vec<RecordingMetadata>>,
    page_size: usize,
    pub calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(recordings: Vec<RecordingMetadata>, page_size: usize) -> Self {
        Self {
            recordings: Mutex::new(recordings),
            page_size,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, recordings: Vec<RecordingMetadata>) {
        *self.recordings.lock() = recordings;
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn list_recordings(&self, _channel: &str, cursor: Option<&str>) -> Result<CatalogPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let all = self.recordings.lock().clone();
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let recordings = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        Ok(CatalogPage {
            recordings,
            cursor: (end < all.len()).then(|| end.to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeLiveStatus {
    status: Mutex<LiveStatus>,
}

impl FakeLiveStatus {
    pub fn set(&self, status: LiveStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl LiveStatusSource for FakeLiveStatus {
    async fn live_status(&self, _channel: &str) -> Result<LiveStatus> {
        Ok(*self.status.lock())
    }
}

/// Fetcher that reports progress, optionally waits on a gate, then
/// succeeds or fails with a fixed class.
pub struct FakeFetcher {
    failure: Mutex<Option<FailureClass>>,
    gate: Option<Arc<Semaphore>>,
    output_dir: PathBuf,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn succeeding(output_dir: &Path) -> Self {
        Self {
            failure: Mutex::new(None),
            gate: None,
            output_dir: output_dir.to_path_buf(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Each fetch blocks until a permit is added to `gate`.
    pub fn gated(output_dir: &Path, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::succeeding(output_dir)
        }
    }

    pub fn failing(output_dir: &Path, class: FailureClass) -> Self {
        let fetcher = Self::succeeding(output_dir);
        *fetcher.failure.lock() = Some(class);
        fetcher
    }

    pub fn set_failure(&self, class: Option<FailureClass>) {
        *self.failure.lock() = class;
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchExecutor for FakeFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        progress(FetchProgress {
            bytes: 500,
            total: Some(1000),
        });

        let gated = match &self.gate {
            Some(gate) => tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                    Ok(())
                }
                _ = cancel.cancelled() => Err(Error::Cancelled),
            },
            None => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        gated?;

        if let Some(class) = *self.failure.lock() {
            return Err(error_for(class));
        }
        progress(FetchProgress {
            bytes: 1000,
            total: Some(1000),
        });
        Ok(self.output_dir.join(format!("{}.mp4", request.recording.id)))
    }
}

pub struct FakePublisher {
    failure: Option<FailureClass>,
    pub calls: AtomicUsize,
}

impl FakePublisher {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(class: FailureClass) -> Self {
        Self {
            failure: Some(class),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PublishExecutor for FakePublisher {
    async fn publish(
        &self,
        _path: &Path,
        metadata: &RecordingMetadata,
        _cancel: CancellationToken,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(class) => Err(error_for(class)),
            None => Ok(format!("https://mirror.example/{}", metadata.id)),
        }
    }
}

/// Chat recorder that writes messages at the given offsets from the
/// nominal start, then waits for cancellation.
pub struct FakeChatRecorder {
    repo: Arc<dyn ChatRepository>,
    offsets_secs: Vec<i64>,
    pub started: Mutex<Vec<(String, DateTime<Utc>)>>,
    pub stopped: AtomicUsize,
}

impl FakeChatRecorder {
    pub fn new(repo: Arc<dyn ChatRepository>, offsets_secs: Vec<i64>) -> Self {
        Self {
            repo,
            offsets_secs,
            started: Mutex::new(Vec::new()),
            stopped: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatRecorder for FakeChatRecorder {
    async fn record(
        &self,
        cancel: CancellationToken,
        attached_id: String,
        nominal_start: DateTime<Utc>,
    ) -> Result<()> {
        self.started
            .lock()
            .push((attached_id.clone(), nominal_start));

        let messages: Vec<NewChatMessage> = self
            .offsets_secs
            .iter()
            .map(|offset| {
                NewChatMessage::observed(
                    attached_id.as_str(),
                    "viewer",
                    format!("message at {}", offset),
                    nominal_start + chrono::Duration::seconds(*offset),
                    nominal_start,
                )
            })
            .collect();
        self.repo.insert_batch(&messages).await?;

        cancel.cancelled().await;
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
