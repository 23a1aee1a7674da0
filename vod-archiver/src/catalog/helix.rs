//! Twitch Helix client for archived videos and live status.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{CatalogPage, CatalogSource, LiveStatus, LiveStatusSource};
use crate::database::models::RecordingMetadata;
use crate::utils::duration::parse_helix_duration;
use crate::utils::http_client::build_http_client;
use crate::{Error, Result};

/// Helix API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelixConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_token: String,
    /// Numeric broadcaster id. Looked up from the login when unset.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            client_id: String::new(),
            access_token: String::new(),
            user_id: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelixList<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
struct HelixPagination {
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixVideo {
    id: String,
    #[serde(default)]
    title: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    duration: String,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    #[serde(rename = "type", default)]
    kind: String,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

/// Parse a `/videos` response body into a catalog page.
///
/// Videos with an unparseable duration are kept with a zero duration.
pub fn parse_videos_page(body: &str) -> Result<CatalogPage> {
    let list: HelixList<HelixVideo> = serde_json::from_str(body)?;
    let recordings = list
        .data
        .into_iter()
        .map(|v| {
            let duration = parse_helix_duration(&v.duration).unwrap_or_else(|| {
                trace!(id = %v.id, duration = %v.duration, "Unparseable video duration");
                0
            });
            RecordingMetadata::new(v.id, v.title, v.created_at, duration)
        })
        .collect();
    let cursor = list
        .pagination
        .and_then(|p| p.cursor)
        .filter(|c| !c.is_empty());

    Ok(CatalogPage { recordings, cursor })
}

/// Parse a `/streams` response body. An empty list means offline.
pub fn parse_stream_status(body: &str) -> Result<LiveStatus> {
    let list: HelixList<HelixStream> = serde_json::from_str(body)?;
    let status = match list.data.into_iter().next() {
        Some(stream) if stream.kind.is_empty() || stream.kind == "live" => LiveStatus {
            live: true,
            started_at: stream.started_at,
        },
        _ => LiveStatus::offline(),
    };
    Ok(status)
}

/// Map a non-success status to the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    let msg = format!("Helix returned {}: {}", status, snippet);
    match status.as_u16() {
        401 | 403 => Error::unauthorized(msg),
        429 => Error::transient(msg),
        _ if status.is_server_error() => Error::transient(msg),
        _ => Error::Other(msg),
    }
}

/// Catalog and live-status source backed by the Helix API.
pub struct HelixClient {
    client: reqwest::Client,
    config: HelixConfig,
    user_ids: Mutex<HashMap<String, String>>,
}

impl HelixClient {
    pub fn new(config: HelixConfig) -> Result<Self> {
        if config.client_id.is_empty() {
            return Err(Error::config("Helix client id is required"));
        }
        let client = build_http_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            client,
            config,
            user_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Seed the login to user-id cache so no lookup is needed.
    pub fn with_known_user(self, login: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.user_ids.lock().insert(login.into(), user_id.into());
        self
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .header("Client-Id", &self.config.client_id)
            .bearer_auth(&self.config.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(body)
    }

    async fn user_id(&self, login: &str) -> Result<String> {
        if let Some(id) = self.user_ids.lock().get(login) {
            return Ok(id.clone());
        }
        if let Some(id) = &self.config.user_id {
            self.user_ids.lock().insert(login.to_string(), id.clone());
            return Ok(id.clone());
        }

        let body = self.get("users", &[("login", login)]).await?;
        let list: HelixList<HelixUser> = serde_json::from_str(&body)?;
        let user = list
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("channel", login))?;

        debug!(login, user_id = %user.id, "Resolved channel id");
        self.user_ids
            .lock()
            .insert(login.to_string(), user.id.clone());
        Ok(user.id)
    }
}

#[async_trait]
impl CatalogSource for HelixClient {
    async fn list_recordings(&self, channel: &str, cursor: Option<&str>) -> Result<CatalogPage> {
        let user_id = self.user_id(channel).await?;
        let first = self.config.page_size.clamp(1, 100).to_string();

        let mut query = vec![
            ("user_id", user_id.as_str()),
            ("type", "archive"),
            ("first", first.as_str()),
        ];
        if let Some(cursor) = cursor {
            query.push(("after", cursor));
        }

        let body = self.get("videos", &query).await?;
        let page = parse_videos_page(&body)?;
        trace!(channel, count = page.recordings.len(), has_more = page.cursor.is_some(), "Fetched catalog page");
        Ok(page)
    }
}

#[async_trait]
impl LiveStatusSource for HelixClient {
    async fn live_status(&self, channel: &str) -> Result<LiveStatus> {
        let user_id = self.user_id(channel).await?;
        let body = self.get("streams", &[("user_id", user_id.as_str())]).await?;
        parse_stream_status(&body)
    }
}
