//! Read-only status surface plus the operator controls that go with it.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::Result;
use crate::database::models::{BreakerRecord, PriorityCount, RecordingDbModel};
use crate::database::repositories::RecordingRepository;
use crate::domain::{FetchState, PublishState};
use crate::engine::{CircuitBreaker, ConcurrencyLimiter, EmaSnapshot, EmaTracker};

/// Progress of one recording with work in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingProgress {
    pub id: String,
    pub title: String,
    pub priority: i64,
    pub fetch_state: FetchState,
    pub bytes: i64,
    pub total: i64,
    pub ratio: Option<f64>,
    pub publish_state: PublishState,
}

impl From<&RecordingDbModel> for RecordingProgress {
    fn from(row: &RecordingDbModel) -> Self {
        Self {
            id: row.id.clone(),
            title: row.title.clone(),
            priority: row.priority,
            fetch_state: row.fetch_state(),
            bytes: row.bytes,
            total: row.total,
            ratio: row.progress_ratio(),
            publish_state: row.publish_state(),
        }
    }
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub channel: String,
    pub breaker: BreakerRecord,
    pub active_slots: usize,
    pub capacity: usize,
    pub pending_by_priority: Vec<PriorityCount>,
    pub in_progress: Vec<RecordingProgress>,
    pub ema: EmaSnapshot,
}

/// Status queries and operator controls for one channel.
pub struct StatusService {
    channel: String,
    repo: Arc<dyn RecordingRepository>,
    breaker: Arc<CircuitBreaker>,
    limiter: ConcurrencyLimiter,
    stats: Arc<EmaTracker>,
}

impl StatusService {
    pub fn new(
        channel: impl Into<String>,
        repo: Arc<dyn RecordingRepository>,
        breaker: Arc<CircuitBreaker>,
        limiter: ConcurrencyLimiter,
        stats: Arc<EmaTracker>,
    ) -> Self {
        Self {
            channel: channel.into(),
            repo,
            breaker,
            limiter,
            stats,
        }
    }

    pub async fn snapshot(&self) -> Result<StatusSnapshot> {
        let pending_by_priority = self.repo.pending_counts_by_priority(&self.channel).await?;
        let in_progress = self
            .repo
            .list_active(&self.channel)
            .await?
            .iter()
            .map(RecordingProgress::from)
            .collect();

        Ok(StatusSnapshot {
            channel: self.channel.clone(),
            breaker: self.breaker.snapshot().await,
            active_slots: self.limiter.active(),
            capacity: self.limiter.capacity(),
            pending_by_priority,
            in_progress,
            ema: self.stats.snapshot(),
        })
    }

    /// Change a recording's priority. Applies from the next selection.
    pub async fn set_priority(&self, id: &str, priority: i64) -> Result<()> {
        self.repo.set_priority(id, priority).await?;
        info!(id, priority, "Recording priority changed");
        Ok(())
    }

    /// Opt a recording in or out of publishing.
    pub async fn set_skip_publish(&self, id: &str, skip: bool) -> Result<()> {
        self.repo.set_skip_publish(id, skip).await?;
        info!(id, skip, "Recording publish opt-out changed");
        Ok(())
    }
}
