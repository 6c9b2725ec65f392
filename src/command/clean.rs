use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, ArgValue, ScanContext, Scanner, TableValue, TimePoint, ValidationRule, ValueTable};
use crate::error::PlatformError;
use crate::permissions::{NativePermission, SubjectKind};
use crate::platform::{ChannelInfo, FetchedMessage, Message, PlatformClient};

const SILENT: ValueTable = &[
    ("silent", TableValue::Bool(true)),
    ("s", TableValue::Bool(true)),
    ("quiet", TableValue::Bool(true)),
    ("q", TableValue::Bool(true)),
    ("тихо", TableValue::Bool(true)),
];

/// Bulk deletion of a channel's recent history.
pub struct Clean {
    definition: CommandDefinition,
}

impl Clean {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("clean", "clean.help")
                .aliases(&["purge"])
                .arg(
                    ArgDef::new("time", Scanner::TimeDistance)
                        .aliases(&["since", "last"])
                        .rules(&[
                            ValidationRule::NonNull,
                            ValidationRule::NonZeroShift,
                            ValidationRule::TimeDistanceOnly,
                        ])
                        .help("clean.arg.time"),
                )
                .arg(ArgDef::new("silent", Scanner::Simple(Some(SILENT))).help("clean.arg.silent"))
                .arg(
                    ArgDef::new("channel", Scanner::ChannelRef)
                        .aliases(&["channels", "in"])
                        .rules(&[ValidationRule::NonEmpty, ValidationRule::ValidTextChannels])
                        .skip_sequential()
                        .help("clean.arg.channel"),
                )
                .arg(
                    ArgDef::new("from", Scanner::Subject)
                        .aliases(&["by", "author"])
                        .rules(&[ValidationRule::SubjectKindIs(SubjectKind::User)])
                        .skip_sequential()
                        .help("clean.arg.from"),
                )
                .native(&[NativePermission::ManageMessages])
                .bot(&["clean"]),
        }
    }
}

impl Default for Clean {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Clean {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    fn default_value(&self, arg: &ArgDef, message: &Message, ctx: &ScanContext<'_>) -> Option<ArgValue> {
        match arg.name {
            "silent" => Some(ArgValue::Bool(false)),
            "channel" => {
                let id = message.channel_id()?;
                let current = ctx
                    .channels
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .unwrap_or_else(|| ChannelInfo {
                        id: id.to_string(),
                        name: id.to_string(),
                        is_text: true,
                    });
                Some(ArgValue::Channels(vec![current]))
            }
            _ => None,
        }
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let Some(TimePoint::Relative(distance)) = inv.time("time") else {
            bail!("clean invoked without a time distance");
        };
        let cutoff = Utc::now() - distance.abs();
        let client = inv.source.client();
        let author = inv.subject("from").map(|s| s.id.as_str());

        let (mut deleted, mut total) = (0, 0);
        for channel in inv.channels("channel") {
            let (channel_deleted, channel_total) =
                clean_channel(client, &channel.id, cutoff, author, client.page_limit()).await?;
            deleted += channel_deleted;
            total += channel_total;
        }
        info!(
            "Cleaned {} of {} message(s) for {} since {}",
            deleted,
            total,
            inv.message.user_id(),
            cutoff
        );

        if inv.flag("silent") {
            return Ok(String::new());
        }
        Ok(inv
            .loc
            .get_string("clean.done", &[deleted.to_string(), total.to_string()]))
    }
}

/// Delete every message posted at or after `cutoff` (by `author` when
/// given), walking history one page at a time. Returns (deleted, total):
/// pages past the first older message are still read to count the rest.
pub(crate) async fn clean_channel(
    client: &dyn PlatformClient,
    channel_id: &str,
    cutoff: DateTime<Utc>,
    author: Option<&str>,
    page_limit: usize,
) -> Result<(usize, usize), PlatformError> {
    let mut before: Option<String> = None;
    let (mut deleted, mut total) = (0, 0);
    let mut deleting = true;

    loop {
        let page = client
            .fetch_messages(channel_id, page_limit, before.as_deref())
            .await?;
        total += page.len();

        if deleting {
            let fresh: Vec<&FetchedMessage> =
                page.iter().filter(|m| m.timestamp >= cutoff).collect();
            let doomed: Vec<String> = fresh
                .iter()
                .filter(|m| author.map_or(true, |a| m.author_id == a))
                .map(|m| m.id.clone())
                .collect();
            if !doomed.is_empty() {
                client.delete_messages(channel_id, &doomed).await?;
                deleted += doomed.len();
            }
            // history is newest first, so an older message ends deletion
            deleting = fresh.len() == page.len();
        }

        if page.len() < page_limit {
            break;
        }
        before = page.last().map(|m| m.id.clone());
    }
    Ok((deleted, total))
}
