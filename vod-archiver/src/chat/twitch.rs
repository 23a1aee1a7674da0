//! Anonymous Twitch chat capture over IRC-on-WebSocket.
//!
//! Messages are buffered and written in batches. The connection is
//! re-established with exponential backoff until the recorder is cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::ChatRecorder;
use crate::database::models::NewChatMessage;
use crate::database::repositories::ChatRepository;
use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

/// Settings for the Twitch chat recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitchChatConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Channel login to join, without the leading `#`.
    pub channel_login: String,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_ws_url() -> String {
    "wss://irc-ws.chat.twitch.tv:443".to_string()
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

impl TwitchChatConfig {
    pub fn new(channel_login: impl Into<String>) -> Self {
        Self {
            ws_url: default_ws_url(),
            channel_login: channel_login.into(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ms = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// A chat line pulled out of a `PRIVMSG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageLine {
    pub author: String,
    pub text: String,
    /// Server timestamp from the `tmi-sent-ts` tag, if present.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Parse one IRC line. Returns `None` for anything but a well-formed `PRIVMSG`.
///
/// ```text
/// @display-name=User;tmi-sent-ts=1700000000000 :user!user@user.tmi.twitch.tv PRIVMSG #chan :hello
/// ```
pub fn parse_privmsg(line: &str) -> Option<ChatMessageLine> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (tags, rest) = match line.strip_prefix('@') {
        Some(tagged) => {
            let (tag_str, rest) = tagged.split_once(' ')?;
            let tags: HashMap<&str, &str> = tag_str
                .split(';')
                .filter_map(|tag| tag.split_once('='))
                .collect();
            (tags, rest)
        }
        None => (HashMap::new(), line),
    };

    let mut parts = rest.splitn(4, ' ');
    let prefix = parts.next()?;
    if parts.next()? != "PRIVMSG" {
        return None;
    }
    let _channel = parts.next()?;
    let text = parts.next()?;
    let text = text.strip_prefix(':').unwrap_or(text);

    let login = prefix.strip_prefix(':')?.split('!').next()?;
    let author = tags
        .get("display-name")
        .filter(|name| !name.is_empty())
        .copied()
        .unwrap_or(login);

    let sent_at = tags
        .get("tmi-sent-ts")
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Some(ChatMessageLine {
        author: author.to_string(),
        text: text.to_string(),
        sent_at,
    })
}

/// How a single connection ended.
enum SessionEnd {
    Cancelled,
    /// Server asked us to reconnect, or closed the socket.
    Dropped,
}

/// Records Twitch chat into the chat repository.
pub struct TwitchChatRecorder {
    config: TwitchChatConfig,
    repo: Arc<dyn ChatRepository>,
}

impl TwitchChatRecorder {
    pub fn new(config: TwitchChatConfig, repo: Arc<dyn ChatRepository>) -> Self {
        install_rustls_provider();
        Self { config, repo }
    }

    async fn session(
        &self,
        cancel: &CancellationToken,
        attached_id: &str,
        nominal_start: DateTime<Utc>,
    ) -> Result<SessionEnd> {
        let (ws_stream, _) = connect_async(self.config.ws_url.as_str())
            .await
            .map_err(|e| Error::Chat(format!("Failed to connect to Twitch chat: {}", e)))?;
        let (mut sender, mut receiver) = ws_stream.split();

        let nick = format!("justinfan{}", 10_000 + rand::random::<u32>() % 90_000);
        let channel = self.config.channel_login.to_lowercase();
        for command in [
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            "PASS SCHMOOPIIE".to_string(),
            format!("NICK {}", nick),
            format!("JOIN #{}", channel),
        ] {
            sender
                .send(Message::Text(command.into()))
                .await
                .map_err(|e| Error::Chat(format!("Failed to send handshake: {}", e)))?;
        }
        info!(channel = %channel, attached_id, "Joined chat");

        let mut buffer: Vec<NewChatMessage> = Vec::new();
        let mut flush_interval =
            tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms.max(10)));
        flush_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break SessionEnd::Cancelled;
                }
                _ = flush_interval.tick() => {
                    self.flush(&mut buffer).await;
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let mut reconnect = false;
                        for line in text.as_str().lines() {
                            if let Some(payload) = line.strip_prefix("PING") {
                                let pong = format!("PONG{}", payload);
                                if let Err(e) = sender.send(Message::Text(pong.into())).await {
                                    self.flush(&mut buffer).await;
                                    return Err(Error::Chat(format!("Failed to answer PING: {}", e)));
                                }
                                trace!("Answered PING");
                            } else if line.contains(" RECONNECT") {
                                reconnect = true;
                            } else if let Some(msg) = parse_privmsg(line) {
                                let sent_at = msg.sent_at.unwrap_or_else(Utc::now);
                                buffer.push(NewChatMessage::observed(
                                    attached_id,
                                    msg.author,
                                    msg.text,
                                    sent_at,
                                    nominal_start,
                                ));
                            }
                        }
                        if buffer.len() >= self.config.batch_size.max(1) {
                            self.flush(&mut buffer).await;
                        }
                        if reconnect {
                            info!(channel = %channel, "Chat server requested reconnect");
                            break SessionEnd::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(channel = %channel, "Chat connection closed by server");
                        break SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.flush(&mut buffer).await;
                        return Err(Error::Chat(format!("Chat connection error: {}", e)));
                    }
                }
            }
        };

        self.flush(&mut buffer).await;
        Ok(end)
    }

    /// Write buffered messages. On failure they stay buffered up to a bound.
    async fn flush(&self, buffer: &mut Vec<NewChatMessage>) {
        if buffer.is_empty() {
            return;
        }
        match self.repo.insert_batch(buffer.as_slice()).await {
            Ok(inserted) => {
                trace!(inserted, "Flushed chat batch");
                buffer.clear();
            }
            Err(e) => {
                let limit = self.config.batch_size.max(1) * 10;
                warn!(error = %e, buffered = buffer.len(), "Failed to persist chat batch");
                if buffer.len() > limit {
                    let dropped = buffer.len() - limit;
                    buffer.drain(..dropped);
                    warn!(dropped, "Dropped oldest buffered chat messages");
                }
            }
        }
    }
}

#[async_trait]
impl ChatRecorder for TwitchChatRecorder {
    async fn record(
        &self,
        cancel: CancellationToken,
        attached_id: String,
        nominal_start: DateTime<Utc>,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.session(&cancel, &attached_id, nominal_start).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Dropped) => attempt = 1,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!(attached_id = %attached_id, attempt, error = %e, "Chat session failed");
                }
            }

            let delay = self.config.reconnect_delay(attempt);
            debug!(attached_id = %attached_id, delay_ms = delay.as_millis() as u64, "Reconnecting to chat");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(attached_id = %attached_id, "Chat recorder stopped");
        Ok(())
    }
}
