//! Fetch executor driving `yt-dlp`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::run_command;
use super::{FetchExecutor, FetchProgress, FetchRequest, ProgressCallback};
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

/// Marker prefixed to machine-readable progress lines.
const PROGRESS_MARKER: &str = "vodarchiver-progress";

/// Settings for the `yt-dlp` fetch executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_command")]
    pub command: String,
    /// Source URL with `{id}` replaced by the recording id.
    #[serde(default = "default_url_template")]
    pub url_template: String,
    /// Extra arguments placed before the URL.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_command() -> String {
    "yt-dlp".to_string()
}

fn default_url_template() -> String {
    "https://www.twitch.tv/videos/{id}".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            url_template: default_url_template(),
            extra_args: Vec::new(),
        }
    }
}

/// Parse a progress line emitted through our `--progress-template`.
///
/// Byte counts may be `NA` or fractional estimates.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?.strip_prefix(':')?;
    let (downloaded, total) = rest.split_once(':')?;

    let parse = |s: &str| -> Option<u64> {
        let value: f64 = s.trim().parse().ok()?;
        (value.is_finite() && value >= 0.0).then_some(value as u64)
    };

    Some(FetchProgress {
        bytes: parse(downloaded)?,
        total: parse(total).filter(|t| *t > 0),
    })
}

/// Downloads recordings with `yt-dlp`, resuming partial files.
pub struct YtDlpFetchExecutor {
    config: FetchConfig,
}

impl YtDlpFetchExecutor {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let id = &request.recording.id;
        let output = request.output_dir.join(format!("{}.%(ext)s", id));

        let mut args = vec![
            "--newline".to_string(),
            "--progress".to_string(),
            "--continue".to_string(),
            "--no-overwrites".to_string(),
        ];
        if let Some(cap) = request.bandwidth_cap {
            args.push("--limit-rate".to_string());
            args.push(cap.to_string());
        }
        args.push("--progress-template".to_string());
        args.push(format!(
            "download:{}:%(progress.downloaded_bytes)s:%(progress.total_bytes,progress.total_bytes_estimate)s",
            PROGRESS_MARKER
        ));
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().into_owned());
        args.extend(self.config.extra_args.iter().cloned());
        args.push(self.config.url_template.replace("{id}", id));
        args
    }
}

#[async_trait]
impl FetchExecutor for YtDlpFetchExecutor {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        ensure_dir_all(&request.output_dir).await?;

        let args = self.build_args(request);
        info!(
            id = %request.recording.id,
            resume_from = request.resume_from,
            bandwidth_cap = ?request.bandwidth_cap,
            "Starting fetch"
        );
        debug!(command = %self.config.command, ?args, "yt-dlp arguments");

        let mut command = Command::new(&self.config.command);
        command.args(&args);

        let lines = run_command(command, &cancel, |line| {
            if let Some(report) = parse_progress_line(line) {
                progress(report);
            }
        })
        .await?;

        let path = lines
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty() && !l.starts_with(PROGRESS_MARKER))
            .map(PathBuf::from)
            .ok_or_else(|| {
                Error::transient(format!(
                    "{} finished without reporting an output path",
                    self.config.command
                ))
            })?;

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            progress(FetchProgress {
                bytes: meta.len(),
                total: Some(meta.len()),
            });
        }
        Ok(path)
    }
}
