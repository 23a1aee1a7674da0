//! Live-to-archive reconciliation.
//!
//! After a stream ends, the catalog is polled for the archived recording
//! matching the placeholder. On a match the placeholder's chat is shifted onto
//! the real recording's clock and re-keyed in one transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::catalog::CatalogSource;
use crate::database::models::RecordingMetadata;
use crate::database::repositories::{MergeOutcome, ReconcileTxOps};
use crate::database::{DbPool, begin_immediate};
use crate::domain::PlaceholderId;

/// Configuration for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay before the first catalog lookup.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Interval between lookups.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long after going offline to keep looking.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Maximum distance between placeholder and candidate starts.
    #[serde(default = "default_match_tolerance_secs")]
    pub match_tolerance_secs: u64,
}

fn default_initial_delay_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    900
}

fn default_match_tolerance_secs() -> u64 {
    600
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            window_secs: default_window_secs(),
            match_tolerance_secs: default_match_tolerance_secs(),
        }
    }
}

/// Inputs captured when a stream goes offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub placeholder: PlaceholderId,
    pub nominal_start: DateTime<Utc>,
    pub offline_at: DateTime<Utc>,
}

/// How a reconciliation run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Merged {
        real_id: String,
        delta_secs: f64,
        messages_moved: u64,
    },
    AlreadyReconciled,
    /// Window elapsed without a match; placeholder left in place.
    Expired,
    Cancelled,
}

/// Pick the archived recording matching a placeholder that started at `start`.
///
/// Only candidates within `tolerance` of `start` qualify. Among those, the
/// latest one starting at or after `start` wins; failing that, the latest one
/// before it.
pub fn select_candidate<'a>(
    candidates: &'a [RecordingMetadata],
    start: DateTime<Utc>,
    tolerance: chrono::Duration,
) -> Option<&'a RecordingMetadata> {
    let in_range = candidates
        .iter()
        .filter(|c| (c.started_at - start).abs() <= tolerance);

    let (after, before): (Vec<_>, Vec<_>) = in_range.partition(|c| c.started_at >= start);

    after
        .into_iter()
        .max_by_key(|c| c.started_at)
        .or_else(|| before.into_iter().max_by_key(|c| c.started_at))
}

/// Finds and merges the archived recording for a live placeholder.
pub struct ReconciliationEngine {
    channel: String,
    config: ReconcileConfig,
    catalog: Arc<dyn CatalogSource>,
    pool: DbPool,
}

impl ReconciliationEngine {
    pub fn new(
        channel: impl Into<String>,
        config: ReconcileConfig,
        catalog: Arc<dyn CatalogSource>,
        pool: DbPool,
    ) -> Self {
        Self {
            channel: channel.into(),
            config,
            catalog,
            pool,
        }
    }

    /// Poll the catalog until a match is merged, the window elapses or `cancel` fires.
    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
        cancel: CancellationToken,
    ) -> ReconcileOutcome {
        let placeholder = request.placeholder.as_str();
        let deadline = chrono::Duration::from_std(Duration::from_secs(self.config.window_secs))
            .ok()
            .and_then(|window| request.offline_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        info!(
            channel = %self.channel,
            placeholder,
            window_secs = self.config.window_secs,
            "Reconciliation scheduled"
        );

        if !sleep_or_cancel(Duration::from_secs(self.config.initial_delay_secs), &cancel).await {
            return ReconcileOutcome::Cancelled;
        }

        loop {
            match self.try_once(&request).await {
                Ok(Some(MergeOutcome::Merged {
                    real_id,
                    delta_secs,
                    messages_moved,
                })) => {
                    info!(
                        channel = %self.channel,
                        placeholder,
                        real_id = %real_id,
                        delta_secs,
                        messages_moved,
                        "Placeholder reconciled"
                    );
                    return ReconcileOutcome::Merged {
                        real_id,
                        delta_secs,
                        messages_moved,
                    };
                }
                Ok(Some(MergeOutcome::AlreadyReconciled)) => {
                    debug!(placeholder, "Placeholder already reconciled");
                    return ReconcileOutcome::AlreadyReconciled;
                }
                Ok(None) => debug!(placeholder, "No matching recording yet"),
                Err(e) => warn!(placeholder, error = %e, "Reconciliation attempt failed"),
            }

            let now = Utc::now();
            if now >= deadline {
                warn!(
                    channel = %self.channel,
                    placeholder,
                    "No archived recording found within window, leaving placeholder unresolved"
                );
                return ReconcileOutcome::Expired;
            }

            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            let wait = remaining.min(Duration::from_secs(self.config.poll_interval_secs));
            if !sleep_or_cancel(wait, &cancel).await {
                return ReconcileOutcome::Cancelled;
            }
        }
    }

    /// One lookup and, on a candidate, one merge. `Ok(None)` means no candidate.
    pub async fn try_once(&self, request: &ReconcileRequest) -> Result<Option<MergeOutcome>> {
        let page = self.catalog.list_recordings(&self.channel, None).await?;
        let tolerance =
            chrono::Duration::from_std(Duration::from_secs(self.config.match_tolerance_secs))
                .unwrap_or_else(|_| chrono::Duration::zero());

        let Some(candidate) = select_candidate(&page.recordings, request.nominal_start, tolerance)
        else {
            return Ok(None);
        };

        self.merge(&request.placeholder, candidate).await.map(Some)
    }

    /// Merge `placeholder` into `real` inside one immediate transaction.
    pub async fn merge(
        &self,
        placeholder: &PlaceholderId,
        real: &RecordingMetadata,
    ) -> Result<MergeOutcome> {
        let mut tx = begin_immediate(&self.pool).await?;
        match ReconcileTxOps::merge(&mut tx, &self.channel, placeholder, real).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed merge also failed");
                }
                Err(e)
            }
        }
    }
}

/// Returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
