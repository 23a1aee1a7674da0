//! Processing orchestrator.
//!
//! Each tick: breaker check, selection, slot acquisition, claim, then a
//! spawned task that fetches (and optionally publishes) the recording.
//! Fetch tasks run independently up to the limiter's capacity.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::breaker::{Admission, CircuitBreaker};
use super::limiter::{ConcurrencyLimiter, SlotToken};
use super::progress::ProgressWriter;
use super::retry::RetryController;
use super::selector::JobSelector;
use super::stats::EmaTracker;
use crate::database::models::{EmaKind, RecordingDbModel};
use crate::database::repositories::RecordingRepository;
use crate::domain::{PublishState, RetryPolicy};
use crate::error::FailureClass;
use crate::executors::{FetchExecutor, FetchRequest, PublishExecutor};
use crate::{Error, Result};

/// Configuration for the processing orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// Per-fetch bandwidth cap in bytes per second.
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
    /// How long a failed recording sits out before it is eligible again.
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Minimum spacing of progress writes for one fetch.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// How long shutdown waits for in-flight tasks.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_retry_cooldown_secs() -> u64 {
    600
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            bandwidth_limit: None,
            retry_cooldown_secs: default_retry_cooldown_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            output_dir: default_output_dir(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Collaborators injected into the orchestrator.
pub struct OrchestratorDeps {
    pub repo: Arc<dyn RecordingRepository>,
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: ConcurrencyLimiter,
    pub stats: Arc<EmaTracker>,
    pub fetcher: Arc<dyn FetchExecutor>,
    pub publisher: Option<Arc<dyn PublishExecutor>>,
}

/// Why a tick stopped dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Breaker rejected admission.
    BreakerOpen,
    /// No eligible recording.
    Idle,
    /// Every slot is busy.
    Saturated,
    /// The half-open probe was dispatched; nothing else may run.
    ProbeDispatched,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub outcome: TickOutcome,
}

impl TickReport {
    fn new(dispatched: usize, outcome: TickOutcome) -> Self {
        Self {
            dispatched,
            outcome,
        }
    }
}

enum Admitted {
    Ready(Admission, RecordingDbModel),
    Stop(TickOutcome),
}

/// Drives one channel's fetch/publish pipeline.
pub struct Orchestrator {
    channel: String,
    config: OrchestratorConfig,
    repo: Arc<dyn RecordingRepository>,
    selector: JobSelector,
    breaker: Arc<CircuitBreaker>,
    limiter: ConcurrencyLimiter,
    stats: Arc<EmaTracker>,
    retry: RetryController,
    fetcher: Arc<dyn FetchExecutor>,
    publisher: Option<Arc<dyn PublishExecutor>>,
    tasks: parking_lot::Mutex<JoinSet<()>>,
}

impl Orchestrator {
    pub fn new(
        channel: impl Into<String>,
        config: OrchestratorConfig,
        retry_policy: RetryPolicy,
        deps: OrchestratorDeps,
    ) -> Self {
        let channel = channel.into();
        let selector = JobSelector::new(
            channel.clone(),
            deps.repo.clone(),
            Duration::from_secs(config.retry_cooldown_secs),
        );

        Self {
            channel,
            config,
            repo: deps.repo,
            selector,
            breaker: deps.breaker,
            limiter: deps.limiter,
            stats: deps.stats,
            retry: RetryController::new(retry_policy),
            fetcher: deps.fetcher,
            publisher: deps.publisher,
            tasks: parking_lot::Mutex::new(JoinSet::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Number of fetch tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Hand rows left `downloading` by a previous process back to the queue.
    pub async fn recover(&self) -> Result<u64> {
        let reset = self.repo.reset_interrupted(&self.channel).await?;
        if reset > 0 {
            info!(channel = %self.channel, count = reset, "Reset interrupted fetches to pending");
        }
        Ok(reset)
    }

    /// Publish again every fetched recording whose publish never finished.
    /// Each publish holds a slot while it runs. Returns the number queued.
    pub async fn resume_publishes(self: &Arc<Self>, cancel: &CancellationToken) -> Result<usize> {
        let Some(publisher) = self.publisher.clone() else {
            return Ok(0);
        };

        let pending = self.repo.list_pending_publishes(&self.channel).await?;
        let mut queued = 0;
        for recording in pending {
            let Some(path) = recording.local_path.clone().map(PathBuf::from) else {
                continue;
            };
            info!(recording_id = %recording.id, path = %path.display(), "Resuming publish");

            let this = Arc::clone(self);
            let publisher = publisher.clone();
            let task_cancel = cancel.child_token();
            self.tasks.lock().spawn(async move {
                let Ok(slot) = this.limiter.acquire(&task_cancel).await else {
                    return;
                };
                this.publish(&recording, &path, publisher, Admission::Granted, &task_cancel)
                    .await;
                slot.release();
            });
            queued += 1;
        }
        Ok(queued)
    }

    /// Run the tick loop until `cancel` fires, then drain in-flight tasks.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.recover().await {
            warn!(channel = %self.channel, error = %e, "Failed to reset interrupted fetches");
        }
        match self.resume_publishes(&cancel).await {
            Ok(0) => {}
            Ok(count) => info!(channel = %self.channel, count, "Resumed interrupted publishes"),
            Err(e) => warn!(channel = %self.channel, error = %e, "Failed to resume publishes"),
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            channel = %self.channel,
            capacity = self.limiter.capacity(),
            "Orchestrator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.tick(&cancel).await {
                Ok(report) => debug!(
                    channel = %self.channel,
                    dispatched = report.dispatched,
                    outcome = ?report.outcome,
                    "Tick finished"
                ),
                Err(e) => warn!(channel = %self.channel, error = %e, "Tick failed"),
            }
        }

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            warn!(channel = %self.channel, "Timed out waiting for in-flight fetches");
        }
        info!(channel = %self.channel, "Orchestrator stopped");
    }

    /// Dispatch as many eligible recordings as capacity allows.
    pub async fn tick(self: &Arc<Self>, cancel: &CancellationToken) -> Result<TickReport> {
        self.reap_finished();

        let mut dispatched = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(TickReport::new(dispatched, TickOutcome::Cancelled));
            }
            // The first dispatch of a tick may wait for a slot; later ones may not.
            if dispatched > 0 && self.limiter.available() == 0 {
                return Ok(TickReport::new(dispatched, TickOutcome::Saturated));
            }

            let (admission, recording) = match self.admit().await? {
                Admitted::Ready(admission, recording) => (admission, recording),
                Admitted::Stop(outcome) => return Ok(TickReport::new(dispatched, outcome)),
            };

            let (slot, admission, recording) = match self.limiter.try_acquire() {
                Some(slot) => (slot, admission, recording),
                None => {
                    // Breaker state and priorities may change while waiting,
                    // so both are taken again once a slot is held.
                    self.abandon(admission).await;
                    let Ok(slot) = self.limiter.acquire(cancel).await else {
                        return Ok(TickReport::new(dispatched, TickOutcome::Cancelled));
                    };
                    match self.admit().await {
                        Ok(Admitted::Ready(admission, recording)) => (slot, admission, recording),
                        Ok(Admitted::Stop(outcome)) => {
                            slot.release();
                            return Ok(TickReport::new(dispatched, outcome));
                        }
                        Err(e) => {
                            slot.release();
                            return Err(e);
                        }
                    }
                }
            };

            match self.repo.claim(&recording.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(recording_id = %recording.id, "Recording claimed elsewhere");
                    slot.release();
                    self.abandon(admission).await;
                    continue;
                }
                Err(e) => {
                    slot.release();
                    self.abandon(admission).await;
                    return Err(e);
                }
            }

            info!(
                channel = %self.channel,
                recording_id = %recording.id,
                priority = recording.priority,
                probe = admission.is_probe(),
                "Dispatching fetch"
            );

            let this = Arc::clone(self);
            let task_cancel = cancel.child_token();
            self.tasks.lock().spawn(async move {
                this.process(recording, admission, slot, task_cancel).await;
            });
            dispatched += 1;

            if admission.is_probe() {
                return Ok(TickReport::new(dispatched, TickOutcome::ProbeDispatched));
            }
        }
    }

    /// Wait for every dispatched task to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }
    }

    /// Breaker admission followed by selection of the next recording.
    async fn admit(&self) -> Result<Admitted> {
        let admission = self.breaker.allow().await;
        if !admission.is_allowed() {
            debug!(channel = %self.channel, "Circuit open, skipping tick");
            return Ok(Admitted::Stop(TickOutcome::BreakerOpen));
        }

        match self.selector.select_next().await {
            Ok(Some(recording)) => Ok(Admitted::Ready(admission, recording)),
            Ok(None) => {
                self.abandon(admission).await;
                Ok(Admitted::Stop(TickOutcome::Idle))
            }
            Err(e) => {
                self.abandon(admission).await;
                Err(e)
            }
        }
    }

    async fn abandon(&self, admission: Admission) {
        if admission.is_probe() {
            self.breaker.release_probe().await;
        }
    }

    async fn process(
        self: Arc<Self>,
        recording: RecordingDbModel,
        admission: Admission,
        slot: SlotToken,
        cancel: CancellationToken,
    ) {
        let id = recording.id.clone();
        let started = Instant::now();
        let request = FetchRequest {
            recording: recording.metadata(),
            bandwidth_cap: self.config.bandwidth_limit,
            resume_from: u64::try_from(recording.bytes).unwrap_or(0),
            output_dir: self.config.output_dir.clone(),
        };

        let progress = ProgressWriter::spawn(
            self.repo.clone(),
            id.clone(),
            Duration::from_millis(self.config.progress_interval_ms),
        );
        let callback = progress.callback();

        let request_ref = &request;
        let outcome = self
            .retry
            .run("fetch", &cancel, |attempt| {
                let fetcher = self.fetcher.clone();
                let callback = callback.clone();
                let cancel = cancel.clone();
                async move {
                    if attempt > 1 {
                        info!(recording_id = %request_ref.recording.id, attempt, "Retrying fetch");
                    }
                    fetcher.fetch(request_ref, callback, cancel).await
                }
            })
            .await;
        drop(callback);
        progress.finish().await;

        match outcome.result {
            Ok(path) => {
                self.on_fetched(&recording, &path, started.elapsed(), admission, &cancel)
                    .await;
            }
            Err(e) if e.is_cancelled() => {
                info!(recording_id = %id, "Fetch cancelled, returning to pending");
                if let Err(e) = self.repo.release_claim(&id).await {
                    warn!(recording_id = %id, error = %e, "Failed to release claim");
                }
                self.abandon(admission).await;
            }
            Err(e) => self.on_fetch_failed(&id, &e, outcome.attempts).await,
        }

        slot.release();
    }

    async fn on_fetched(
        &self,
        recording: &RecordingDbModel,
        path: &Path,
        elapsed: Duration,
        admission: Admission,
        cancel: &CancellationToken,
    ) {
        let id = recording.id.as_str();
        let publish_state = match (&self.publisher, recording.skip_publish) {
            (None, _) => PublishState::None,
            (Some(_), true) => PublishState::Skipped,
            (Some(_), false) => PublishState::Pending,
        };

        if let Err(e) = self
            .repo
            .mark_fetched(id, &path.to_string_lossy(), publish_state)
            .await
        {
            error!(recording_id = %id, error = %e, "Fetched but failed to record completion");
            self.breaker.record_failure().await;
            return;
        }

        self.breaker.record_success(admission).await;
        self.stats.record(EmaKind::Fetch, elapsed).await;
        info!(
            recording_id = %id,
            path = %path.display(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Fetch completed"
        );

        if publish_state != PublishState::Pending {
            return;
        }
        if let Some(publisher) = &self.publisher {
            self.publish(recording, path, publisher.clone(), admission, cancel)
                .await;
        }
    }

    async fn publish(
        &self,
        recording: &RecordingDbModel,
        path: &Path,
        publisher: Arc<dyn PublishExecutor>,
        admission: Admission,
        cancel: &CancellationToken,
    ) {
        let id = recording.id.as_str();
        let metadata = recording.metadata();
        let metadata_ref = &metadata;
        let started = Instant::now();

        let outcome = self
            .retry
            .run("publish", cancel, |_| {
                let publisher = publisher.clone();
                let cancel = cancel.clone();
                async move { publisher.publish(path, metadata_ref, cancel).await }
            })
            .await;

        match outcome.result {
            Ok(url) => {
                if let Err(e) = self.repo.mark_published(id, &url).await {
                    error!(recording_id = %id, error = %e, "Published but failed to store URL");
                }
                self.breaker.record_success(admission).await;
                self.stats.record(EmaKind::Publish, started.elapsed()).await;
                info!(recording_id = %id, url = %url, "Publish completed");
            }
            Err(e) if e.is_cancelled() => {
                info!(recording_id = %id, "Publish cancelled");
            }
            Err(e) => {
                warn!(
                    recording_id = %id,
                    attempts = outcome.attempts,
                    error = %e,
                    "Publish failed, keeping fetched artifact"
                );
                if let Err(db_err) = self.repo.record_publish_failure(id, &e.to_string()).await {
                    error!(recording_id = %id, error = %db_err, "Failed to record publish failure");
                }
                self.breaker.record_failure().await;
            }
        }
    }

    async fn on_fetch_failed(&self, id: &str, err: &Error, attempts: u32) {
        match err.failure_class() {
            FailureClass::Storage => {
                error!(recording_id = %id, attempts, error = %err, "Fetch failed on storage")
            }
            class => warn!(
                recording_id = %id,
                attempts,
                class = ?class,
                error = %err,
                "Fetch failed"
            ),
        }

        if let Err(e) = self
            .repo
            .record_fetch_failure(id, &err.to_string(), attempts)
            .await
        {
            error!(recording_id = %id, error = %e, "Failed to record fetch failure");
        }
        self.breaker.record_failure().await;
    }
}

fn log_join_result(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        error!("Fetch task panicked: {}", e);
    }
}
