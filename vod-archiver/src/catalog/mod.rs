//! Catalog and live-status sources.

mod helix;
mod sync;

pub use helix::{HelixClient, HelixConfig};
pub use sync::{CatalogSync, CatalogSyncConfig, SyncReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::database::models::RecordingMetadata;

/// One page of a channel's published recordings, newest first.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub recordings: Vec<RecordingMetadata>,
    /// Cursor for the next page, `None` on the last page.
    pub cursor: Option<String>,
}

/// Whether a channel is live right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveStatus {
    pub live: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl LiveStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn live_since(started_at: DateTime<Utc>) -> Self {
        Self {
            live: true,
            started_at: Some(started_at),
        }
    }
}

/// Source of a channel's published recordings.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_recordings(&self, channel: &str, cursor: Option<&str>) -> Result<CatalogPage>;
}

/// Source of a channel's live status.
#[async_trait]
pub trait LiveStatusSource: Send + Sync {
    async fn live_status(&self, channel: &str) -> Result<LiveStatus>;
}
