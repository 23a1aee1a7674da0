//! Publish executor that shells out to a user-supplied command.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::PublishExecutor;
use super::process::run_command;
use crate::database::models::RecordingMetadata;
use crate::{Error, Result};

/// Settings for the command publish executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Program to run. Invoked as `<command> <args..> <path> <title> <id>`.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PublishConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }
}

/// Republishes artifacts by running a command.
///
/// The last non-empty stdout line is taken as the public URL.
pub struct CommandPublishExecutor {
    config: PublishConfig,
}

impl CommandPublishExecutor {
    pub fn new(config: PublishConfig) -> Self {
        Self { config }
    }
}

fn publish_url(lines: &[String]) -> Option<&str> {
    lines.iter().map(|l| l.trim()).rev().find(|l| !l.is_empty())
}

#[async_trait]
impl PublishExecutor for CommandPublishExecutor {
    async fn publish(
        &self,
        path: &Path,
        metadata: &RecordingMetadata,
        cancel: CancellationToken,
    ) -> Result<String> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(path)
            .arg(&metadata.title)
            .arg(&metadata.id);

        info!(id = %metadata.id, path = %path.display(), "Publishing recording");
        let lines = run_command(command, &cancel, |line| debug!(line, "publish output")).await?;

        publish_url(&lines).map(str::to_string).ok_or_else(|| {
            Error::transient(format!(
                "{} exited successfully without printing a URL",
                self.config.command
            ))
        })
    }
}
