pub mod discord;
pub mod slack;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::PlatformError;

/// Supported chat platforms. The name doubles as the `source` column in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Discord,
    Slack,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Discord => "discord",
            SourceKind::Slack => "slack",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A raw platform event waiting to be normalized.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub source: SourceKind,
    pub payload: Value,
}

/// Organization and channel always travel together; a message without
/// them is a private message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    organization_id: String,
    channel_id: String,
}

/// Canonical view of one inbound chat message, independent of the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    source: SourceKind,
    location: Option<Location>,
    user_id: String,
    content: String,
    reply_channel: String,
}

impl Message {
    /// A message posted in a channel of an organization (guild / workspace).
    pub fn guild(
        source: SourceKind,
        organization_id: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel_id = channel_id.into();
        Self {
            source,
            reply_channel: channel_id.clone(),
            location: Some(Location {
                organization_id: organization_id.into(),
                channel_id,
            }),
            user_id: user_id.into(),
            content: content.into(),
        }
    }

    /// A direct message. `reply_channel` is the DM conversation to answer in.
    pub fn private(
        source: SourceKind,
        reply_channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source,
            location: None,
            user_id: user_id.into(),
            content: content.into(),
            reply_channel: reply_channel.into(),
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.organization_id.as_str())
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.channel_id.as_str())
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    pub fn is_private(&self) -> bool {
        self.location.is_none()
    }
}

/// Normalize a raw payload from the given platform.
///
/// Returns `None` for events that are not user messages (bot echoes,
/// edits, payloads without an author or channel).
pub fn normalize(source: SourceKind, payload: &Value) -> Option<Message> {
    match source {
        SourceKind::Discord => discord::normalize(payload),
        SourceKind::Slack => slack::normalize(payload),
    }
}

/// A channel known to belong to an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub is_text: bool,
}

/// One message from a channel history page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: String,
    pub author_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The capabilities the pipeline needs from a platform SDK.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), PlatformError>;

    async fn delete_messages(&self, channel_id: &str, ids: &[String])
        -> Result<(), PlatformError>;

    /// One page of history, newest first, strictly older than `before` when given.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, PlatformError>;

    async fn has_permission_in_channel(
        &self,
        organization_id: &str,
        user_id: &str,
        channel_id: &str,
        permission: &str,
    ) -> Result<bool, PlatformError>;

    async fn member_role_ids(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError>;

    async fn list_channels(&self, organization_id: &str) -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Largest history page the platform serves in one call.
    fn page_limit(&self) -> usize {
        100
    }
}
