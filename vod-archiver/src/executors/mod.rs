//! Fetch and publish executors.
//!
//! The orchestrator only sees the [`FetchExecutor`] and [`PublishExecutor`]
//! traits. The default implementations drive external commands.

mod command_publish;
mod process;
mod ytdlp;

pub use command_publish::{CommandPublishExecutor, PublishConfig};
pub use process::classify_stderr;
pub use ytdlp::{FetchConfig, YtDlpFetchExecutor, parse_progress_line};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::database::models::RecordingMetadata;

/// Everything an executor needs to fetch one recording.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub recording: RecordingMetadata,
    /// Bytes per second, `None` for unlimited.
    pub bandwidth_cap: Option<u64>,
    /// Bytes already on disk from an earlier attempt.
    pub resume_from: u64,
    pub output_dir: PathBuf,
}

/// A progress report from an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}

/// Progress sink handed to a fetch executor.
pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Downloads a recording to local storage.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    /// Fetch `request.recording` and return the artifact path.
    ///
    /// Must return [`crate::Error::Cancelled`] once `cancel` fires, leaving any
    /// partial artifact in place so the next attempt can resume.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf>;
}

/// Republishes a fetched artifact to a second platform.
#[async_trait]
pub trait PublishExecutor: Send + Sync {
    /// Publish the artifact at `path` and return its public URL.
    async fn publish(
        &self,
        path: &Path,
        metadata: &RecordingMetadata,
        cancel: CancellationToken,
    ) -> Result<String>;
}
