//! Live chat capture.

mod twitch;

pub use twitch::{ChatMessageLine, TwitchChatConfig, TwitchChatRecorder, parse_privmsg};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Records a channel's chat into rows keyed to `attached_id`.
///
/// Each row's `rel_timestamp` is `observed - nominal_start` in seconds.
/// Runs until `cancel` fires.
#[async_trait]
pub trait ChatRecorder: Send + Sync {
    async fn record(
        &self,
        cancel: CancellationToken,
        attached_id: String,
        nominal_start: DateTime<Utc>,
    ) -> Result<()>;
}
