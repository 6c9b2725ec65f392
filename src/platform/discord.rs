use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChannelInfo, FetchedMessage, Message, PlatformClient, SourceKind};
use crate::config::DiscordConfig;
use crate::error::PlatformError;

/// Discord rejects message content above 2000 characters.
pub const TEXT_LIMIT: usize = 2000;

const BULK_DELETE_MAX: usize = 100;
// bulk-delete refuses messages older than two weeks
const BULK_DELETE_MAX_AGE_DAYS: i64 = 14;

// First second of 2015, the zero point of Discord snowflake timestamps
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

// Permission bits, see the Discord developer docs
const KICK_MEMBERS: u64 = 1 << 1;
const BAN_MEMBERS: u64 = 1 << 2;
const ADMINISTRATOR: u64 = 1 << 3;
const MANAGE_CHANNELS: u64 = 1 << 4;
const MANAGE_GUILD: u64 = 1 << 5;
const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const MANAGE_MESSAGES: u64 = 1 << 13;
const MANAGE_ROLES: u64 = 1 << 28;

const ALL_PERMISSIONS: u64 = u64::MAX;

// Channel types that carry text messages
const GUILD_TEXT: u8 = 0;
const GUILD_ANNOUNCEMENT: u8 = 5;

// Overwrite target types
const OVERWRITE_MEMBER: u8 = 1;

pub fn permission_bit(name: &str) -> Option<u64> {
    let bit = match name {
        "KICK_MEMBERS" => KICK_MEMBERS,
        "BAN_MEMBERS" => BAN_MEMBERS,
        "ADMINISTRATOR" => ADMINISTRATOR,
        "MANAGE_CHANNELS" => MANAGE_CHANNELS,
        "MANAGE_GUILD" => MANAGE_GUILD,
        "VIEW_CHANNEL" => VIEW_CHANNEL,
        "SEND_MESSAGES" => SEND_MESSAGES,
        "MANAGE_MESSAGES" => MANAGE_MESSAGES,
        "MANAGE_ROLES" => MANAGE_ROLES,
        _ => return None,
    };
    Some(bit)
}

/// Normalize a gateway `MESSAGE_CREATE` dispatch (or its bare `d` object).
pub fn normalize(payload: &Value) -> Option<Message> {
    let data = match payload.get("t") {
        Some(t) if t == "MESSAGE_CREATE" => payload.get("d")?,
        Some(_) => return None,
        None => payload,
    };

    let author = data.get("author")?;
    let is_bot = author.get("bot").and_then(Value::as_bool).unwrap_or(false);
    if is_bot || data.get("webhook_id").is_some() {
        return None;
    }

    let user_id = author.get("id")?.as_str()?;
    let channel_id = data.get("channel_id")?.as_str()?;
    let content = data.get("content").and_then(Value::as_str).unwrap_or("");

    Some(match data.get("guild_id").and_then(Value::as_str) {
        Some(guild_id) => Message::guild(SourceKind::Discord, guild_id, channel_id, user_id, content),
        None => Message::private(SourceKind::Discord, channel_id, user_id, content),
    })
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    author: ApiUser,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ApiGuild {
    owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiRole {
    pub id: String,
    pub permissions: String,
}

#[derive(Debug, Deserialize)]
struct ApiMember {
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    permission_overwrites: Vec<ApiOverwrite>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOverwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub allow: String,
    pub deny: String,
}

fn bits(field: &str) -> u64 {
    field.parse().unwrap_or(0)
}

/// Effective permissions of a member in a channel, computed the way Discord
/// does: owner and administrator get everything; otherwise the guild-level
/// role union, then `@everyone`, role and member overwrites in that order.
pub fn compute_channel_permissions(
    guild_id: &str,
    owner_id: &str,
    user_id: &str,
    member_roles: &[String],
    roles: &[ApiRole],
    overwrites: &[ApiOverwrite],
) -> u64 {
    if user_id == owner_id {
        return ALL_PERMISSIONS;
    }

    let mut base = roles
        .iter()
        .filter(|r| r.id == guild_id)
        .fold(0, |acc, r| acc | bits(&r.permissions));
    for role in roles.iter().filter(|r| member_roles.contains(&r.id)) {
        base |= bits(&role.permissions);
    }
    if base & ADMINISTRATOR != 0 {
        return ALL_PERMISSIONS;
    }

    let mut permissions = base;
    if let Some(everyone) = overwrites.iter().find(|o| o.id == guild_id) {
        permissions &= !bits(&everyone.deny);
        permissions |= bits(&everyone.allow);
    }

    let (mut allow, mut deny) = (0, 0);
    for overwrite in overwrites
        .iter()
        .filter(|o| o.kind != OVERWRITE_MEMBER && member_roles.contains(&o.id))
    {
        allow |= bits(&overwrite.allow);
        deny |= bits(&overwrite.deny);
    }
    permissions &= !deny;
    permissions |= allow;

    if let Some(member) = overwrites
        .iter()
        .find(|o| o.kind == OVERWRITE_MEMBER && o.id == user_id)
    {
        permissions &= !bits(&member.deny);
        permissions |= bits(&member.allow);
    }
    permissions
}

/// Creation time encoded in a snowflake id.
fn snowflake_time(id: &str) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(id.parse::<u64>().ok()? >> 22).ok()?;
    DateTime::from_timestamp_millis(millis + DISCORD_EPOCH_MS)
}

/// Split ids into those bulk-delete accepts and those that have to be
/// deleted one at a time. Unparseable ids count as old.
fn partition_by_age(ids: &[String], now: DateTime<Utc>) -> (Vec<&String>, Vec<&String>) {
    // keep a minute of slack for requests that take a while to arrive
    let oldest = now - TimeDelta::days(BULK_DELETE_MAX_AGE_DAYS) + TimeDelta::minutes(1);
    ids.iter()
        .partition(|id| snowflake_time(id).is_some_and(|created| created > oldest))
}

/// Discord REST client for the capabilities the pipeline uses.
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Discord HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response, PlatformError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PlatformError::Api {
            platform: "discord",
            status: status.as_u16(),
            message,
        })
    }

    async fn delete_one(&self, channel_id: &str, id: &str) -> Result<(), PlatformError> {
        let path = format!("/channels/{}/messages/{}", channel_id, id);
        Self::send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let response = Self::send(self.request(Method::GET, path)).await?;
        response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl PlatformClient for DiscordClient {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        let path = format!("/channels/{}/messages", channel_id);
        Self::send(self.request(Method::POST, &path).json(&json!({ "content": text }))).await?;
        Ok(())
    }

    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<(), PlatformError> {
        let (recent, old) = partition_by_age(ids, Utc::now());
        for chunk in recent.chunks(BULK_DELETE_MAX) {
            if let [id] = chunk {
                self.delete_one(channel_id, id).await?;
            } else {
                let path = format!("/channels/{}/messages/bulk-delete", channel_id);
                Self::send(self.request(Method::POST, &path).json(&json!({ "messages": chunk })))
                    .await?;
            }
            debug!("Deleted {} message(s) in {}", chunk.len(), channel_id);
        }
        for id in &old {
            self.delete_one(channel_id, id).await?;
        }
        if !old.is_empty() {
            debug!("Deleted {} old message(s) one by one in {}", old.len(), channel_id);
        }
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, PlatformError> {
        let mut path = format!(
            "/channels/{}/messages?limit={}",
            channel_id,
            limit.min(BULK_DELETE_MAX)
        );
        if let Some(before) = before {
            path.push_str(&format!("&before={}", before));
        }
        let messages: Vec<ApiMessage> = self.get(&path).await?;
        Ok(messages
            .into_iter()
            .map(|m| FetchedMessage {
                id: m.id,
                author_id: m.author.id,
                timestamp: m.timestamp,
            })
            .collect())
    }

    async fn has_permission_in_channel(
        &self,
        organization_id: &str,
        user_id: &str,
        channel_id: &str,
        permission: &str,
    ) -> Result<bool, PlatformError> {
        let Some(bit) = permission_bit(permission) else {
            warn!("Unknown Discord permission requested: {}", permission);
            return Ok(false);
        };

        let guild_path = format!("/guilds/{}", organization_id);
        let roles_path = format!("/guilds/{}/roles", organization_id);
        let member_path = format!("/guilds/{}/members/{}", organization_id, user_id);
        let channel_path = format!("/channels/{}", channel_id);
        let (guild, roles, member, channel) = tokio::try_join!(
            self.get::<ApiGuild>(&guild_path),
            self.get::<Vec<ApiRole>>(&roles_path),
            self.get::<ApiMember>(&member_path),
            self.get::<ApiChannel>(&channel_path),
        )?;

        let effective = compute_channel_permissions(
            organization_id,
            &guild.owner_id,
            user_id,
            &member.roles,
            &roles,
            &channel.permission_overwrites,
        );
        Ok(effective & bit == bit)
    }

    async fn member_role_ids(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let member: ApiMember = self
            .get(&format!("/guilds/{}/members/{}", organization_id, user_id))
            .await?;
        Ok(member.roles)
    }

    async fn list_channels(&self, organization_id: &str) -> Result<Vec<ChannelInfo>, PlatformError> {
        let channels: Vec<ApiChannel> = self
            .get(&format!("/guilds/{}/channels", organization_id))
            .await?;
        Ok(channels
            .into_iter()
            .map(|c| ChannelInfo {
                name: c.name.unwrap_or_else(|| c.id.clone()),
                id: c.id,
                is_text: matches!(c.kind, GUILD_TEXT | GUILD_ANNOUNCEMENT),
            })
            .collect())
    }

    fn page_limit(&self) -> usize {
        BULK_DELETE_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snowflake_at(at: DateTime<Utc>) -> String {
        (((at.timestamp_millis() - DISCORD_EPOCH_MS) as u64) << 22).to_string()
    }

    #[test]
    fn test_snowflake_time() {
        // example id from the Discord reference, created 2016-04-30 11:18:25.796 UTC
        let created = snowflake_time("175928847299117063").unwrap();
        assert_eq!(created.timestamp_millis(), 1_462_015_105_796);
        assert_eq!(snowflake_time("not-a-number"), None);
    }

    #[test]
    fn test_old_messages_are_not_bulk_deleted() {
        let now = Utc::now();
        let ids = vec![
            snowflake_at(now - TimeDelta::minutes(5)),
            snowflake_at(now - TimeDelta::days(21)),
            snowflake_at(now - TimeDelta::days(13)),
            snowflake_at(now - TimeDelta::days(14)),
            "garbage".to_string(),
        ];
        let (recent, old) = partition_by_age(&ids, now);
        assert_eq!(recent, vec![&ids[0], &ids[2]]);
        assert_eq!(old, vec![&ids[1], &ids[3], &ids[4]]);
    }

    fn role(id: &str, permissions: u64) -> ApiRole {
        ApiRole {
            id: id.to_string(),
            permissions: permissions.to_string(),
        }
    }

    fn overwrite(id: &str, kind: u8, allow: u64, deny: u64) -> ApiOverwrite {
        ApiOverwrite {
            id: id.to_string(),
            kind,
            allow: allow.to_string(),
            deny: deny.to_string(),
        }
    }

    #[test]
    fn test_normalize_guild_message() {
        let payload = json!({
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "m1",
                "guild_id": "g1",
                "channel_id": "c1",
                "author": { "id": "u1", "username": "bob" },
                "content": "!clean 10m"
            }
        });
        let msg = normalize(&payload).unwrap();
        assert_eq!(msg, Message::guild(SourceKind::Discord, "g1", "c1", "u1", "!clean 10m"));
    }

    #[test]
    fn test_normalize_direct_message_has_no_organization() {
        let payload = json!({
            "channel_id": "dm1",
            "author": { "id": "u1" },
            "content": "!help"
        });
        let msg = normalize(&payload).unwrap();
        assert!(msg.is_private());
        assert_eq!(msg.organization_id(), None);
        assert_eq!(msg.channel_id(), None);
        assert_eq!(msg.reply_channel(), "dm1");
    }

    #[test]
    fn test_normalize_skips_bots_and_other_events() {
        let bot = json!({
            "guild_id": "g1",
            "channel_id": "c1",
            "author": { "id": "b1", "bot": true },
            "content": "hi"
        });
        assert!(normalize(&bot).is_none());

        let typing = json!({ "t": "TYPING_START", "d": {} });
        assert!(normalize(&typing).is_none());

        let no_author = json!({ "channel_id": "c1", "content": "x" });
        assert!(normalize(&no_author).is_none());
    }

    #[test]
    fn test_normalize_missing_content_is_empty() {
        let payload = json!({ "guild_id": "g1", "channel_id": "c1", "author": { "id": "u1" } });
        assert_eq!(normalize(&payload).unwrap().content(), "");
    }

    #[test]
    fn test_owner_and_administrator_have_everything() {
        let roles = vec![role("g1", 0), role("admin", ADMINISTRATOR)];
        assert_eq!(
            compute_channel_permissions("g1", "owner", "owner", &[], &roles, &[]),
            ALL_PERMISSIONS
        );
        let member_roles = vec!["admin".to_string()];
        let deny_all = vec![overwrite("g1", 0, 0, MANAGE_MESSAGES)];
        assert_eq!(
            compute_channel_permissions("g1", "owner", "u1", &member_roles, &roles, &deny_all),
            ALL_PERMISSIONS
        );
    }

    #[test]
    fn test_overwrites_apply_in_order() {
        let roles = vec![role("g1", SEND_MESSAGES), role("mods", MANAGE_MESSAGES)];
        let member_roles = vec!["mods".to_string()];

        let base = compute_channel_permissions("g1", "owner", "u1", &member_roles, &roles, &[]);
        assert_eq!(base, SEND_MESSAGES | MANAGE_MESSAGES);

        // role overwrite denies, member overwrite allows again
        let overwrites = vec![
            overwrite("mods", 0, 0, MANAGE_MESSAGES),
            overwrite("u1", OVERWRITE_MEMBER, MANAGE_MESSAGES, 0),
        ];
        let effective =
            compute_channel_permissions("g1", "owner", "u1", &member_roles, &roles, &overwrites);
        assert_ne!(effective & MANAGE_MESSAGES, 0);

        let overwrites = vec![
            overwrite("g1", 0, MANAGE_MESSAGES, 0),
            overwrite("mods", 0, 0, MANAGE_MESSAGES),
        ];
        let effective =
            compute_channel_permissions("g1", "owner", "u1", &member_roles, &roles, &overwrites);
        assert_eq!(effective & MANAGE_MESSAGES, 0);
    }

    #[test]
    fn test_permission_bit_names() {
        assert_eq!(permission_bit("MANAGE_MESSAGES"), Some(1 << 13));
        assert_eq!(permission_bit("manage_messages"), None);
    }
}
