//! Chat message database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::delta_secs;

/// One captured chat utterance.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ChatMessageDbModel {
    pub id: i64,
    /// Placeholder or real recording id
    pub recording_id: String,
    pub author: String,
    pub body: String,
    /// Absolute wall-clock time, epoch ms
    pub sent_at: i64,
    /// Seconds relative to the owning recording's nominal start
    pub rel_timestamp: f64,
}

/// A chat message about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub recording_id: String,
    pub author: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub rel_timestamp: f64,
}

impl NewChatMessage {
    /// Build a message observed at `sent_at` for a recording that nominally
    /// started at `nominal_start`.
    pub fn observed(
        recording_id: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
        sent_at: DateTime<Utc>,
        nominal_start: DateTime<Utc>,
    ) -> Self {
        Self {
            recording_id: recording_id.into(),
            author: author.into(),
            body: body.into(),
            sent_at,
            rel_timestamp: delta_secs(sent_at, nominal_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_observed_relative_timestamp() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let sent = start + chrono::Duration::milliseconds(10_500);
        let msg = NewChatMessage::observed("live-1", "alice", "hi", sent, start);
        assert_eq!(msg.rel_timestamp, 10.5);
    }
}
