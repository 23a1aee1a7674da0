//! Recording database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::{FetchState, PublishState};

/// One archived unit of content, or a live placeholder.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RecordingDbModel {
    pub id: String,
    pub channel: String,
    pub title: String,
    /// Nominal start, epoch ms
    pub started_at: i64,
    pub duration_secs: i64,
    /// Higher is fetched sooner
    pub priority: i64,
    pub is_placeholder: bool,
    /// pending | downloading | completed | failed
    pub fetch_state: String,
    pub bytes: i64,
    pub total: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
    pub local_path: Option<String>,
    pub skip_publish: bool,
    /// none | pending | published | failed | skipped
    pub publish_state: String,
    pub publish_url: Option<String>,
    pub publish_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub progress_updated_at: Option<i64>,
}

impl RecordingDbModel {
    pub fn fetch_state(&self) -> FetchState {
        FetchState::parse(&self.fetch_state).unwrap_or_default()
    }

    pub fn publish_state(&self) -> PublishState {
        PublishState::parse(&self.publish_state).unwrap_or_default()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.started_at)
    }

    /// Fetch progress in `[0, 1]`, if the total size is known.
    pub fn progress_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.bytes as f64 / self.total as f64).clamp(0.0, 1.0))
    }

    /// Title/start/duration view of this row.
    pub fn metadata(&self) -> RecordingMetadata {
        RecordingMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            started_at: self.started_at(),
            duration_secs: self.duration_secs,
        }
    }
}

/// Catalog-facing metadata of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: i64,
}

impl RecordingMetadata {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            started_at,
            duration_secs,
        }
    }
}

/// Pending recordings grouped by priority, for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PriorityCount {
    pub priority: i64,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bytes: i64, total: i64) -> RecordingDbModel {
        RecordingDbModel {
            id: "1".into(),
            channel: "c".into(),
            title: String::new(),
            started_at: 0,
            duration_secs: 0,
            priority: 0,
            is_placeholder: false,
            fetch_state: "downloading".into(),
            bytes,
            total,
            retry_count: 0,
            last_error: None,
            last_error_at: None,
            local_path: None,
            skip_publish: false,
            publish_state: "none".into(),
            publish_url: None,
            publish_error: None,
            created_at: 0,
            updated_at: 0,
            progress_updated_at: None,
        }
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(row(0, 0).progress_ratio(), None);
        assert_eq!(row(50, 200).progress_ratio(), Some(0.25));
        assert_eq!(row(10, 10).progress_ratio(), Some(1.0));
    }

    #[test]
    fn test_state_accessors() {
        let r = row(0, 0);
        assert_eq!(r.fetch_state(), FetchState::Downloading);
        assert_eq!(r.publish_state(), PublishState::None);
    }
}
