//! Periodic catalog sync into the recordings table.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CatalogSource;
use crate::Result;
use crate::database::repositories::{CatalogUpsert, RecordingRepository};

/// Configuration for catalog sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on pages walked per sync.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_interval_secs() -> u64 {
    600
}

fn default_max_pages() -> u32 {
    10
}

impl Default for CatalogSyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_pages: default_max_pages(),
        }
    }
}

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u32,
    pub inserted: u64,
    pub refreshed: u64,
}

/// Keeps the recordings table in step with the channel's catalog.
pub struct CatalogSync {
    channel: String,
    config: CatalogSyncConfig,
    catalog: Arc<dyn CatalogSource>,
    repo: Arc<dyn RecordingRepository>,
}

impl CatalogSync {
    pub fn new(
        channel: impl Into<String>,
        config: CatalogSyncConfig,
        catalog: Arc<dyn CatalogSource>,
        repo: Arc<dyn RecordingRepository>,
    ) -> Self {
        Self {
            channel: channel.into(),
            config,
            catalog,
            repo,
        }
    }

    /// Sync every interval until `cancel` fires. Starts with an immediate pass.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.sync_once().await {
                Ok(report) if report.inserted > 0 => info!(
                    channel = %self.channel,
                    inserted = report.inserted,
                    refreshed = report.refreshed,
                    pages = report.pages,
                    "Catalog sync found new recordings"
                ),
                Ok(report) => debug!(channel = %self.channel, ?report, "Catalog sync complete"),
                Err(e) => warn!(channel = %self.channel, error = %e, "Catalog sync failed"),
            }
        }
        debug!(channel = %self.channel, "Catalog sync stopped");
    }

    /// Walk the catalog newest first until a page yields nothing new.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut cursor: Option<String> = None;

        while report.pages < self.config.max_pages.max(1) {
            let page = self
                .catalog
                .list_recordings(&self.channel, cursor.as_deref())
                .await?;
            report.pages += 1;

            let mut inserted_here = 0u64;
            for recording in &page.recordings {
                match self.repo.upsert_from_catalog(&self.channel, recording).await? {
                    CatalogUpsert::Inserted => {
                        debug!(id = %recording.id, title = %recording.title, "New recording queued");
                        inserted_here += 1;
                    }
                    CatalogUpsert::Refreshed => report.refreshed += 1,
                }
            }
            report.inserted += inserted_here;

            if inserted_here == 0 {
                break;
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(report)
    }
}
