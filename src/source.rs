use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::command::{Command, CommandDefinition, CommandRegistry, Invocation};
use crate::error::PlatformError;
use crate::platform::{PlatformClient, SourceKind};

/// Every configured platform, keyed by kind.
pub type Sources = Arc<HashMap<SourceKind, Arc<Source>>>;

/// One platform integration: its client, its commands and its reply rules.
pub struct Source {
    kind: SourceKind,
    client: Arc<dyn PlatformClient>,
    registry: CommandRegistry,
    prefix: String,
    text_limit: usize,
}

impl Source {
    pub fn new(
        kind: SourceKind,
        client: Arc<dyn PlatformClient>,
        registry: CommandRegistry,
        prefix: impl Into<String>,
        text_limit: usize,
    ) -> Self {
        Self {
            kind,
            client,
            registry,
            prefix: prefix.into(),
            text_limit,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn client(&self) -> &dyn PlatformClient {
        self.client.as_ref()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Platform names of the native permissions a command requires.
    pub fn command_permissions(&self, command: &CommandDefinition) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for permission in command.native_permissions {
            let name = permission.platform_name(self.kind);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Run an authorized command and adapt its output to the platform markup.
    pub async fn execute(
        &self,
        command: &dyn Command,
        invocation: &Invocation<'_>,
    ) -> anyhow::Result<String> {
        let output = command.execute(invocation).await?;
        Ok(match self.kind {
            SourceKind::Discord => output,
            // Slack mrkdwn uses single asterisks for bold
            SourceKind::Slack => output.replace("**", "*"),
        })
    }

    /// Send `text` to `channel_id`, split to the platform limit. Chunks are
    /// sent concurrently and may arrive out of order.
    pub async fn reply(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        let chunks = split_message(text, self.text_limit);
        debug!(
            "Replying in {} on {} with {} chunk(s)",
            channel_id,
            self.kind,
            chunks.len()
        );
        let results = join_all(
            chunks
                .iter()
                .map(|chunk| self.client.send_message(channel_id, chunk)),
        )
        .await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!("Failed to send reply chunk to {}: {}", channel_id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Split text into chunks of at most `max_len` bytes at line breaks. A
/// single line longer than `max_len` is hard-split. Concatenating the
/// chunks gives back `text`.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // limit smaller than one character: emit that character alone
            end = text[start..]
                .char_indices()
                .nth(1)
                .map_or(text.len(), |(i, _)| start + i);
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::MockClient;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_split_prefers_line_boundaries() {
        let text = "first line\nsecond line\nthird";
        let chunks = split_message(text, 15);
        assert_eq!(chunks[0], "first line\n");
        assert!(chunks.iter().all(|c| c.len() <= 15));
    }

    #[test]
    fn test_long_line_is_hard_split() {
        assert_eq!(
            split_message("aaaa bbbb cccc", 6),
            vec!["aaaa b", "bbb cc", "cc"]
        );
        assert_eq!(
            split_message("ab\ncdefghij", 5),
            vec!["ab\n", "cdefg", "hij"]
        );
    }

    #[test]
    fn test_split_roundtrip_is_lossless() {
        let samples = [
            "a".repeat(4500),
            "line of text\n".repeat(400),
            "слово ".repeat(900),
            "🦀".repeat(700),
            format!("{}\n{}", "x".repeat(2500), "y".repeat(10)),
        ];
        for text in samples {
            for limit in [1, 3, 7, 2000, 4000] {
                let chunks = split_message(&text, limit);
                assert_eq!(chunks.concat(), text, "limit {limit}");
                assert!(chunks.iter().all(|c| !c.is_empty()));
                if limit >= 4 {
                    assert!(chunks.iter().all(|c| c.len() <= limit));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_reply_sends_every_chunk() {
        let client = Arc::new(MockClient::default());
        let source = Source::new(
            SourceKind::Discord,
            client.clone(),
            CommandRegistry::builtin().unwrap(),
            "!",
            10,
        );
        source.reply("c1", "aaaaa\nbbbbb\nccccc").await.unwrap();

        let mut sent: Vec<String> = client.sent().into_iter().map(|(_, text)| text).collect();
        sent.sort();
        assert_eq!(sent, vec!["aaaaa\n", "bbbbb\n", "ccccc"]);
    }

    #[test]
    fn test_command_permissions_deduplicate_platform_names() {
        let registry = CommandRegistry::builtin().unwrap();
        let source = Source::new(
            SourceKind::Slack,
            Arc::new(MockClient::default()),
            CommandRegistry::builtin().unwrap(),
            "!",
            4000,
        );
        let clean = registry.find("clean").unwrap();
        assert_eq!(source.command_permissions(clean.definition()), vec!["admin"]);
    }
}
