//! Typed application configuration loaded from the environment.
//!
//! Variables may also come from a `.env` file in the working directory.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSyncConfig, HelixConfig};
use crate::chat::TwitchChatConfig;
use crate::domain::RetryPolicy;
use crate::engine::{BreakerConfig, OrchestratorConfig};
use crate::executors::{FetchConfig, PublishConfig};
use crate::live::{PollerConfig, ReconcileConfig};
use crate::utils::duration::parse_byte_size;
use crate::{Error, Result};

/// Full application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub database_url: String,
    /// Channel login; also the key rows are stored under.
    pub channel: String,
    pub log_dir: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub poller: PollerConfig,
    pub reconcile: ReconcileConfig,
    pub catalog_sync: CatalogSyncConfig,
    pub helix: HelixConfig,
    pub fetch: FetchConfig,
    /// `None` disables publishing.
    pub publish: Option<PublishConfig>,
    pub chat: TwitchChatConfig,
}

fn default_database_url() -> String {
    "sqlite:vod-archiver.db?mode=rwc".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Parse `key` if set and non-empty.
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("Invalid value for {}: {} ({})", key, value, e))),
        _ => Ok(None),
    }
}

fn string_var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ArchiverConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        let channel = string_var(lookup, "CHANNEL_LOGIN")
            .ok_or_else(|| Error::config("CHANNEL_LOGIN is required"))?
            .to_lowercase();

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(v) = parse_var(lookup, "MAX_CONCURRENT_DOWNLOADS")? {
            orchestrator.max_concurrent_downloads = v;
        }
        if let Some(raw) = string_var(lookup, "BANDWIDTH_LIMIT") {
            let bytes = parse_byte_size(&raw)
                .ok_or_else(|| Error::config(format!("Invalid value for BANDWIDTH_LIMIT: {}", raw)))?;
            orchestrator.bandwidth_limit = (bytes > 0).then_some(bytes);
        }
        if let Some(v) = parse_var(lookup, "RETRY_COOLDOWN_SECS")? {
            orchestrator.retry_cooldown_secs = v;
        }
        if let Some(v) = parse_var(lookup, "TICK_INTERVAL_SECS")? {
            orchestrator.tick_interval_secs = v;
        }
        if let Some(v) = string_var(lookup, "OUTPUT_DIR") {
            orchestrator.output_dir = PathBuf::from(v);
        }

        let mut retry = RetryPolicy::default();
        if let Some(v) = parse_var(lookup, "RETRY_MAX_ATTEMPTS")? {
            retry.max_attempts = v;
        }
        if let Some(v) = parse_var(lookup, "RETRY_BASE_DELAY_MS")? {
            retry.base_delay_ms = v;
        }

        let mut breaker = BreakerConfig::default();
        if let Some(v) = parse_var(lookup, "BREAKER_THRESHOLD")? {
            breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var(lookup, "BREAKER_COOLDOWN_SECS")? {
            breaker.cooldown_secs = v;
        }

        let mut poller = PollerConfig::default();
        if let Some(v) = parse_var(lookup, "LIVE_POLL_INTERVAL_SECS")? {
            poller.poll_interval_secs = v;
        }

        let mut reconcile = ReconcileConfig::default();
        if let Some(v) = parse_var(lookup, "RECONCILE_WINDOW_SECS")? {
            reconcile.window_secs = v;
        }
        if let Some(v) = parse_var(lookup, "RECONCILE_POLL_INTERVAL_SECS")? {
            reconcile.poll_interval_secs = v;
        }
        if let Some(v) = parse_var(lookup, "RECONCILE_INITIAL_DELAY_SECS")? {
            reconcile.initial_delay_secs = v;
        }

        let mut catalog_sync = CatalogSyncConfig::default();
        if let Some(v) = parse_var(lookup, "CATALOG_SYNC_INTERVAL_SECS")? {
            catalog_sync.interval_secs = v;
        }

        let mut helix = HelixConfig::default();
        if let Some(v) = string_var(lookup, "HELIX_API_BASE") {
            helix.api_base = v;
        }
        helix.client_id = string_var(lookup, "HELIX_CLIENT_ID").unwrap_or_default();
        helix.access_token = string_var(lookup, "HELIX_ACCESS_TOKEN").unwrap_or_default();
        helix.user_id = string_var(lookup, "CHANNEL_ID");

        let mut fetch = FetchConfig::default();
        if let Some(v) = string_var(lookup, "FETCH_COMMAND") {
            fetch.command = v;
        }
        if let Some(v) = string_var(lookup, "FETCH_URL_TEMPLATE") {
            fetch.url_template = v;
        }

        let config = Self {
            database_url: string_var(lookup, "DATABASE_URL").unwrap_or_else(default_database_url),
            chat: TwitchChatConfig::new(channel.clone()),
            channel,
            log_dir: string_var(lookup, "LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_log_dir),
            orchestrator,
            breaker,
            retry,
            poller,
            reconcile,
            catalog_sync,
            helix,
            fetch,
            publish: string_var(lookup, "PUBLISH_COMMAND").map(PublishConfig::new),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrent_downloads == 0 {
            return Err(Error::config("MAX_CONCURRENT_DOWNLOADS must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(Error::config("BREAKER_THRESHOLD must be at least 1"));
        }
        if self.helix.client_id.is_empty() {
            return Err(Error::config("HELIX_CLIENT_ID is required"));
        }
        for (key, value) in [
            ("HELIX_API_BASE", &self.helix.api_base),
            ("chat websocket url", &self.chat.ws_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::config(format!("Invalid URL for {}: {} ({})", key, value, e)))?;
        }
        if !self.fetch.url_template.contains("{id}") {
            return Err(Error::config("FETCH_URL_TEMPLATE must contain {id}"));
        }
        Ok(())
    }
}
