//! Placeholder recording ids.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const PREFIX: &str = "live-";

/// Synthetic id `live-<unix-start-seconds>` used while a stream is live and the
/// platform has not assigned a permanent id yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceholderId(String);

impl PlaceholderId {
    /// Placeholder for a stream that started at `start`.
    pub fn for_start(start: DateTime<Utc>) -> Self {
        Self(format!("{}{}", PREFIX, start.timestamp()))
    }

    /// Parse an id, accepting only well-formed placeholders.
    pub fn parse(id: &str) -> Option<Self> {
        let secs = id.strip_prefix(PREFIX)?;
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        secs.parse::<i64>().ok()?;
        Some(Self(id.to_string()))
    }

    /// Whether `id` has the placeholder shape.
    pub fn is_placeholder(id: &str) -> bool {
        Self::parse(id).is_some()
    }

    /// Start time encoded in the id (second precision).
    pub fn encoded_start(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.0[PREFIX.len()..].parse().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlaceholderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
