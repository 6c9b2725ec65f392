use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChannelInfo, FetchedMessage, Message, PlatformClient, SourceKind};
use crate::config::SlackConfig;
use crate::error::PlatformError;

/// Slack truncates message text beyond 4000 characters.
pub const TEXT_LIMIT: usize = 4000;

const HISTORY_PAGE: usize = 200;
const CHANNEL_PAGE: usize = 200;

/// Normalize an Events API `event_callback` envelope (or a bare message event).
pub fn normalize(payload: &Value) -> Option<Message> {
    let (team_id, event) = match payload.get("type").and_then(Value::as_str) {
        Some("event_callback") => (
            payload.get("team_id").and_then(Value::as_str),
            payload.get("event")?,
        ),
        _ => (None, payload),
    };

    if event.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    // edits, joins and bot posts all carry a subtype or a bot id
    if event.get("subtype").is_some() || event.get("bot_id").is_some() {
        return None;
    }

    let user_id = event.get("user")?.as_str()?;
    let channel_id = event.get("channel")?.as_str()?;
    let content = unescape(event.get("text").and_then(Value::as_str).unwrap_or(""));

    if event.get("channel_type").and_then(Value::as_str) == Some("im") {
        return Some(Message::private(SourceKind::Slack, channel_id, user_id, content));
    }
    let team_id = team_id.or_else(|| event.get("team").and_then(Value::as_str))?;
    Some(Message::guild(SourceKind::Slack, team_id, channel_id, user_id, content))
}

/// Undo Slack's `&`, `<` and `>` escaping of user text.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// A message `ts` of the form `seconds.micros`.
fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (seconds, fraction) = ts.split_once('.').unwrap_or((ts, "0"));
    let seconds: i64 = seconds.parse().ok()?;
    let micros: u32 = format!("{:0<6}", fraction).get(..6)?.parse().ok()?;
    DateTime::from_timestamp(seconds, micros * 1000)
}

/// Slack Web API client for the capabilities the pipeline uses.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Send a request and unwrap Slack's `{"ok": ..., "error": ...}` envelope.
    async fn call(&self, method: &str, request: RequestBuilder) -> Result<Value, PlatformError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(format!("{}: {}", method, e)))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        Err(PlatformError::Api {
            platform: "slack",
            status,
            message: body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string(),
        })
    }

    async fn post(&self, method: &str, body: Value) -> Result<Value, PlatformError> {
        self.call(method, self.http.post(self.url(method)).json(&body))
            .await
    }

    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<Value, PlatformError> {
        self.call(method, self.http.get(self.url(method)).query(query))
            .await
    }
}

fn str_field<'v>(value: &'v Value, field: &str) -> Option<&'v str> {
    value.get(field).and_then(Value::as_str)
}

fn array<'v>(value: &'v Value, field: &str) -> &'v [Value] {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[async_trait]
impl PlatformClient for SlackClient {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        self.post("chat.postMessage", json!({ "channel": channel_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<(), PlatformError> {
        for ts in ids {
            self.post("chat.delete", json!({ "channel": channel_id, "ts": ts }))
                .await?;
        }
        debug!("Deleted {} message(s) in {}", ids.len(), channel_id);
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, PlatformError> {
        let mut query = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.min(HISTORY_PAGE).to_string()),
        ];
        if let Some(before) = before {
            query.push(("latest", before.to_string()));
        }
        let body = self.get("conversations.history", &query).await?;

        let mut messages = Vec::new();
        for message in array(&body, "messages") {
            let Some(ts) = str_field(message, "ts") else {
                continue;
            };
            let Some(timestamp) = parse_ts(ts) else {
                warn!("Skipping message with malformed ts {}", ts);
                continue;
            };
            let author_id = str_field(message, "user")
                .or_else(|| str_field(message, "bot_id"))
                .unwrap_or_default();
            messages.push(FetchedMessage {
                id: ts.to_string(),
                author_id: author_id.to_string(),
                timestamp,
            });
        }
        Ok(messages)
    }

    async fn has_permission_in_channel(
        &self,
        _organization_id: &str,
        user_id: &str,
        _channel_id: &str,
        permission: &str,
    ) -> Result<bool, PlatformError> {
        if permission != "admin" {
            warn!("Unknown Slack permission requested: {}", permission);
            return Ok(false);
        }
        let body = self.get("users.info", &[("user", user_id.to_string())]).await?;
        let user = body.get("user").unwrap_or(&Value::Null);
        let flag = |name: &str| user.get(name).and_then(Value::as_bool).unwrap_or(false);
        Ok(flag("is_admin") || flag("is_owner") || flag("is_primary_owner"))
    }

    async fn member_role_ids(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let body = self
            .get(
                "usergroups.list",
                &[
                    ("include_users", "true".to_string()),
                    ("team_id", organization_id.to_string()),
                ],
            )
            .await?;
        Ok(array(&body, "usergroups")
            .iter()
            .filter(|group| {
                array(group, "users")
                    .iter()
                    .any(|u| u.as_str() == Some(user_id))
            })
            .filter_map(|group| str_field(group, "id").map(str::to_string))
            .collect())
    }

    async fn list_channels(&self, organization_id: &str) -> Result<Vec<ChannelInfo>, PlatformError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", CHANNEL_PAGE.to_string()),
                ("team_id", organization_id.to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let body = self.get("conversations.list", &query).await?;

            for channel in array(&body, "channels") {
                let Some(id) = str_field(channel, "id") else {
                    continue;
                };
                channels.push(ChannelInfo {
                    id: id.to_string(),
                    name: str_field(channel, "name").unwrap_or(id).to_string(),
                    // every Slack conversation carries text
                    is_text: true,
                });
            }

            cursor = body
                .pointer("/response_metadata/next_cursor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }
        Ok(channels)
    }

    fn page_limit(&self) -> usize {
        HISTORY_PAGE
    }
}
