//! Picks the next recording to fetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::Result;
use crate::database::models::RecordingDbModel;
use crate::database::repositories::RecordingRepository;

/// Highest priority first, earliest start breaking ties, skipping rows that
/// failed within the retry cooldown.
pub struct JobSelector {
    channel: String,
    repo: Arc<dyn RecordingRepository>,
    retry_cooldown: Duration,
}

impl JobSelector {
    pub fn new(
        channel: impl Into<String>,
        repo: Arc<dyn RecordingRepository>,
        retry_cooldown: Duration,
    ) -> Self {
        Self {
            channel: channel.into(),
            repo,
            retry_cooldown,
        }
    }

    pub async fn select_next(&self) -> Result<Option<RecordingDbModel>> {
        self.select_next_at(Utc::now()).await
    }

    pub async fn select_next_at(&self, now: DateTime<Utc>) -> Result<Option<RecordingDbModel>> {
        let cooldown_ms = i64::try_from(self.retry_cooldown.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(cooldown_ms);
        self.repo.select_next(&self.channel, cutoff).await
    }
}
