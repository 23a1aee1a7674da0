//! Coalesces executor progress into at most one database write per interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::database::repositories::RecordingRepository;
use crate::executors::{FetchProgress, ProgressCallback};

/// Background writer for one fetch's progress.
pub struct ProgressWriter {
    tx: Arc<watch::Sender<Option<FetchProgress>>>,
    done: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressWriter {
    pub fn spawn(
        repo: Arc<dyn RecordingRepository>,
        recording_id: String,
        interval: Duration,
    ) -> Self {
        let (tx, mut rx) = watch::channel(None::<FetchProgress>);
        let done = CancellationToken::new();
        let stop = done.clone();

        let handle = tokio::spawn(async move {
            let mut last_written: Option<FetchProgress> = None;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = stop.cancelled() => break,
                }

                let latest = *rx.borrow_and_update();
                write(&*repo, &recording_id, latest, &mut last_written).await;

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop.cancelled() => break,
                }
            }

            // Final flush so the row reflects the last report.
            let latest = *rx.borrow();
            write(&*repo, &recording_id, latest, &mut last_written).await;
        });

        Self {
            tx: Arc::new(tx),
            done,
            handle,
        }
    }

    /// Callback to hand to the fetch executor.
    pub fn callback(&self) -> ProgressCallback {
        let tx = self.tx.clone();
        Arc::new(move |progress| {
            tx.send_replace(Some(progress));
        })
    }

    /// Stop the writer after flushing the latest report.
    pub async fn finish(self) {
        self.done.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress writer task failed");
        }
    }
}

async fn write(
    repo: &dyn RecordingRepository,
    recording_id: &str,
    latest: Option<FetchProgress>,
    last_written: &mut Option<FetchProgress>,
) {
    let Some(progress) = latest else {
        return;
    };
    if *last_written == Some(progress) {
        return;
    }

    let bytes = i64::try_from(progress.bytes).unwrap_or(i64::MAX);
    let total = progress
        .total
        .and_then(|t| i64::try_from(t).ok())
        .unwrap_or(0);
    match repo.update_progress(recording_id, bytes, total).await {
        Ok(()) => *last_written = Some(progress),
        Err(e) => warn!(recording_id, error = %e, "Failed to persist fetch progress"),
    }
}
