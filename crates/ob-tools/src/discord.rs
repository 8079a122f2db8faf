//! Discord REST adapter: channel history and replies.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ob_core::Error;

use crate::history::{ChannelHistory, HistoryOrder, HistoryPage, MessageRecord, PageRequest};

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Discord's epoch (2015-01-01T00:00:00Z) in Unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
/// Discord caps history pages at 100 messages.
const MAX_PAGE_LIMIT: usize = 100;

/// The smallest snowflake for `instant`: every message created at or after
/// it has an id at least this large.
pub fn snowflake_for(instant: DateTime<Utc>) -> u64 {
    let ms = (instant.timestamp_millis() - DISCORD_EPOCH_MS).max(0);
    (ms as u64) << 22
}

pub struct DiscordClient {
    client: Client,
    base_url: String,
    token: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_timeout(token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent("DiscordBot (https://github.com/andrew/odinbot-rs, 0.1.0)")
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Post `content` to `channel_id`.
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), Error> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&CreateMessage { content })
            .send()
            .await
            .map_err(request_error)?;

        check_status(response).await?;
        debug!(channel = %channel_id, chars = content.chars().count(), "Sent Discord message");
        Ok(())
    }
}

#[async_trait]
impl ChannelHistory for DiscordClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<HistoryPage, Error> {
        // The first page starts at the window's upper bound so newer history
        // is never scanned.
        let before = match &request.cursor {
            Some(cursor) => cursor.clone(),
            None => snowflake_for(request.window_end).to_string(),
        };
        let limit = request.limit.clamp(1, MAX_PAGE_LIMIT);
        let url = format!("{}/channels/{}/messages", self.base_url, request.channel_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .query(&[("limit", limit.to_string()), ("before", before)])
            .send()
            .await
            .map_err(request_error)?;

        let raw: Vec<DiscordMessage> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::serialization(format!("Discord history response: {}", e)))?;

        let next_cursor = if raw.len() < limit {
            None
        } else {
            raw.last().map(|m| m.id.clone())
        };

        let messages = raw
            .into_iter()
            .map(DiscordMessage::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            messages,
            next_cursor,
            order: HistoryOrder::NewestFirst,
        })
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("Discord request: {}", e))
    } else {
        Error::network(format!("Discord request failed: {}", e))
    }
}

async fn check_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::auth(body),
        StatusCode::TOO_MANY_REQUESTS => Error::rate_limit(body),
        _ => Error::api(status.as_u16(), body),
    })
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: String,
    author: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

impl DiscordMessage {
    fn into_record(self) -> Result<MessageRecord, Error> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                Error::serialization(format!("bad timestamp on message {}: {}", self.id, e))
            })?
            .with_timezone(&Utc);

        Ok(MessageRecord {
            id: self.id,
            author_id: self.author.id,
            author_name: self.author.global_name.unwrap_or(self.author.username),
            text: self.content,
            timestamp,
            is_bot: self.author.bot,
        })
    }
}
