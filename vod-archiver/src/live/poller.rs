//! Live poller: detects stream up/down transitions for one channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconcile::{ReconcileOutcome, ReconcileRequest, ReconciliationEngine};
use crate::Result;
use crate::catalog::{LiveStatus, LiveStatusSource};
use crate::chat::ChatRecorder;
use crate::database::repositories::RecordingRepository;
use crate::domain::PlaceholderId;

/// Configuration for the live poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Leftover placeholders younger than this are reconciled again on startup.
    #[serde(default = "default_resume_lookback_secs")]
    pub resume_lookback_secs: u64,
    /// How long to wait for the chat recorder to stop.
    #[serde(default = "default_recorder_stop_timeout_secs")]
    pub recorder_stop_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_resume_lookback_secs() -> u64 {
    24 * 60 * 60
}

fn default_recorder_stop_timeout_secs() -> u64 {
    10
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            resume_lookback_secs: default_resume_lookback_secs(),
            recorder_stop_timeout_secs: default_recorder_stop_timeout_secs(),
        }
    }
}

/// A running chat recorder bound to one placeholder.
pub struct RecorderHandle {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// Channel session state owned by the poller.
#[derive(Default)]
pub enum ChannelSession {
    #[default]
    Offline,
    Live {
        placeholder: PlaceholderId,
        started_at: DateTime<Utc>,
        recorder: Option<RecorderHandle>,
    },
}

impl ChannelSession {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    pub fn placeholder(&self) -> Option<&PlaceholderId> {
        match self {
            Self::Live { placeholder, .. } => Some(placeholder),
            Self::Offline => None,
        }
    }
}

/// A state change observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    WentLive {
        placeholder: PlaceholderId,
        started_at: DateTime<Utc>,
    },
    WentOffline {
        placeholder: PlaceholderId,
        offline_at: DateTime<Utc>,
    },
}

/// Polls live status and drives placeholder creation, chat capture and
/// reconciliation hand-off.
pub struct LivePoller {
    channel: String,
    config: PollerConfig,
    status: Arc<dyn LiveStatusSource>,
    repo: Arc<dyn RecordingRepository>,
    recorder: Arc<dyn ChatRecorder>,
    reconciler: Arc<ReconciliationEngine>,
    session: ChannelSession,
    reconciliations: JoinSet<ReconcileOutcome>,
}

impl LivePoller {
    pub fn new(
        channel: impl Into<String>,
        config: PollerConfig,
        status: Arc<dyn LiveStatusSource>,
        repo: Arc<dyn RecordingRepository>,
        recorder: Arc<dyn ChatRecorder>,
        reconciler: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            channel: channel.into(),
            config,
            status,
            repo,
            recorder,
            reconciler,
            session: ChannelSession::Offline,
            reconciliations: JoinSet::new(),
        }
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    /// Poll until `cancel` fires, then stop the recorder and wait for reconciliations.
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.resume(&cancel).await {
            warn!(channel = %self.channel, error = %e, "Failed to resume leftover placeholders");
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once(&cancel).await {
                Ok(Some(transition)) => debug!(channel = %self.channel, ?transition, "Live transition"),
                Ok(None) => {}
                Err(e) => warn!(channel = %self.channel, error = %e, "Live poll failed"),
            }
            self.reap_reconciliations();
        }

        // Shutdown leaves the placeholder live; the next start re-attaches to it.
        let recorder = match &mut self.session {
            ChannelSession::Live { recorder, .. } => recorder.take(),
            ChannelSession::Offline => None,
        };
        if let Some(recorder) = recorder {
            self.stop_recorder(recorder).await;
        }
        self.join_reconciliations().await;
        info!(channel = %self.channel, "Live poller stopped");
    }

    /// Startup recovery for placeholders left by a previous run.
    ///
    /// A placeholder matching the current live stream is re-attached; other
    /// placeholders within the look-back get a fresh reconciliation. When the
    /// live status cannot be read, the newest placeholder is left for the
    /// next poll.
    pub async fn resume(&mut self, cancel: &CancellationToken) -> Result<()> {
        let now = Utc::now();
        let placeholders = self.repo.list_placeholders(&self.channel).await?;
        let (status, current) = match self.status.live_status(&self.channel).await {
            Ok(status) => {
                let current = status
                    .live
                    .then(|| PlaceholderId::for_start(status.started_at.unwrap_or(now)));
                (status, current)
            }
            Err(e) => {
                // The newest placeholder may belong to a stream that is still
                // live, so it waits for the next poll.
                warn!(channel = %self.channel, error = %e, "Live status unavailable at startup, treating as offline");
                let newest = placeholders
                    .iter()
                    .max_by_key(|row| row.started_at)
                    .and_then(|row| PlaceholderId::parse(&row.id));
                (LiveStatus::offline(), newest)
            }
        };

        let lookback = chrono::Duration::from_std(Duration::from_secs(self.config.resume_lookback_secs))
            .unwrap_or_else(|_| chrono::Duration::zero());

        for row in placeholders {
            let Some(placeholder) = PlaceholderId::parse(&row.id) else {
                continue;
            };
            if current.as_ref() == Some(&placeholder) {
                continue;
            }

            let started_at = row.started_at();
            if now - started_at > lookback {
                debug!(placeholder = %placeholder, "Leftover placeholder outside look-back, leaving unresolved");
                continue;
            }

            info!(placeholder = %placeholder, "Resuming reconciliation for leftover placeholder");
            self.hand_off(
                ReconcileRequest {
                    placeholder,
                    nominal_start: started_at,
                    offline_at: now,
                },
                cancel,
            );
        }

        if status.live {
            self.go_live(status, now, cancel).await?;
        }
        Ok(())
    }

    /// One status check. Returns the transition it caused, if any.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<Option<Transition>> {
        // An error here leaves the session untouched.
        let status = self.status.live_status(&self.channel).await?;
        let now = Utc::now();

        match (self.session.placeholder().cloned(), status.live) {
            (None, true) => self.go_live(status, now, cancel).await.map(Some),
            (Some(_), false) => Ok(self.go_offline(now, cancel).await),
            (Some(placeholder), true) => {
                // A new start time means the stream restarted between polls.
                let restarted = status
                    .started_at
                    .is_some_and(|start| PlaceholderId::for_start(start) != placeholder);
                if restarted {
                    self.go_offline(now, cancel).await;
                    self.go_live(status, now, cancel).await.map(Some)
                } else {
                    Ok(None)
                }
            }
            (None, false) => Ok(None),
        }
    }

    async fn go_live(
        &mut self,
        status: LiveStatus,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Transition> {
        let started_at = status.started_at.unwrap_or(now);
        let placeholder = PlaceholderId::for_start(started_at);

        let created = self
            .repo
            .create_placeholder(&self.channel, &placeholder, started_at.timestamp_millis())
            .await?;
        info!(
            channel = %self.channel,
            placeholder = %placeholder,
            resumed = !created,
            "Stream is live"
        );

        let recorder_cancel = cancel.child_token();
        let recorder = self.recorder.clone();
        let attached_id = placeholder.as_str().to_string();
        let token = recorder_cancel.clone();
        let handle =
            tokio::spawn(async move { recorder.record(token, attached_id, started_at).await });

        self.session = ChannelSession::Live {
            placeholder: placeholder.clone(),
            started_at,
            recorder: Some(RecorderHandle {
                cancel: recorder_cancel,
                handle,
            }),
        };

        Ok(Transition::WentLive {
            placeholder,
            started_at,
        })
    }

    async fn go_offline(
        &mut self,
        offline_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<Transition> {
        let ChannelSession::Live {
            placeholder,
            started_at,
            recorder,
        } = std::mem::take(&mut self.session)
        else {
            return None;
        };

        if let Some(recorder) = recorder {
            self.stop_recorder(recorder).await;
        }
        info!(channel = %self.channel, placeholder = %placeholder, "Stream went offline");

        self.hand_off(
            ReconcileRequest {
                placeholder: placeholder.clone(),
                nominal_start: started_at,
                offline_at,
            },
            cancel,
        );

        Some(Transition::WentOffline {
            placeholder,
            offline_at,
        })
    }

    fn hand_off(&mut self, request: ReconcileRequest, cancel: &CancellationToken) {
        let reconciler = self.reconciler.clone();
        let token = cancel.child_token();
        self.reconciliations
            .spawn(async move { reconciler.reconcile(request, token).await });
    }

    async fn stop_recorder(&self, recorder: RecorderHandle) {
        recorder.cancel.cancel();
        let timeout = Duration::from_secs(self.config.recorder_stop_timeout_secs);
        match tokio::time::timeout(timeout, recorder.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(channel = %self.channel, error = %e, "Chat recorder ended with error"),
            Ok(Err(e)) => warn!(channel = %self.channel, error = %e, "Chat recorder task failed"),
            Err(_) => warn!(channel = %self.channel, "Chat recorder did not stop in time"),
        }
    }

    fn reap_reconciliations(&mut self) {
        while let Some(result) = self.reconciliations.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Reconciliation task failed");
            }
        }
    }

    /// Wait for every handed-off reconciliation to finish.
    pub async fn join_reconciliations(&mut self) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.reconciliations.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Reconciliation task failed"),
            }
        }
        outcomes
    }
}
