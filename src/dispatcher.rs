//! Turns one normalized message into at most one command execution.
//!
//! A message moves through identification, argument scanning, validation
//! and the permission check before it executes. Any step may reject it with
//! a localized reason; a message that is not a command is not an error.
//! Direct messages take a shorter path without permissions or locks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::args::{scan, validate, ArgValue, ScanContext, Scanner, ValidationFailure};
use crate::command::{Command, CommandDefinition, Invocation};
use crate::error::{DispatchError, PlatformError, Rejection};
use crate::locale::{Locales, Localizer};
use crate::permissions::{Authorization, PermissionResolver, SubjectKind};
use crate::platform::{ChannelInfo, Message};
use crate::scheduler::sync::GuildSync;
use crate::source::Source;
use crate::storage::Store;

/// The step that rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CommandIdentified,
    ArgsScanned,
    ArgsValidated,
    PermissionChecked,
}

#[derive(Debug)]
pub enum Outcome {
    NotACommand,
    Rejected {
        stage: Stage,
        reason: Rejection,
        reply: String,
    },
    /// `reply` may be empty when the command has nothing to say.
    Executed {
        command: &'static str,
        reply: String,
    },
}

/// Per-(source, organization, command) locks for exclusive commands.
#[derive(Default)]
struct CommandLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CommandLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Unlock and forget the entry once nobody else holds or awaits it.
    async fn release(&self, key: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.inner.lock().await;
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

pub struct Dispatcher {
    store: Store,
    locales: Arc<Locales>,
    sync: GuildSync,
    locks: CommandLocks,
}

impl Dispatcher {
    pub fn new(store: Store, locales: Arc<Locales>, sync: GuildSync) -> Self {
        Self {
            store,
            locales,
            sync,
            locks: CommandLocks::default(),
        }
    }

    /// Localizer for replies to `message` that are not command output.
    pub async fn localizer_for(&self, source: &Source, message: &Message) -> Localizer {
        match message.organization_id() {
            Some(organization_id) => self
                .locales
                .for_organization(&self.store, source.kind(), organization_id)
                .await
                .unwrap_or_else(|_| self.locales.default_localizer()),
            None => self.locales.default_localizer(),
        }
    }

    pub async fn process(&self, source: &Source, message: &Message) -> Result<Outcome, DispatchError> {
        let Some(tokens) = tokenize(message.content(), source.prefix()) else {
            return Ok(Outcome::NotACommand);
        };
        let Some((command, used)) = source.registry().identify(&tokens) else {
            debug!("No command matches '{}'", tokens[0]);
            return Ok(Outcome::NotACommand);
        };
        let arguments = &tokens[used..];
        debug!("Identified command {}", command.definition().name);

        match message.organization_id() {
            Some(organization_id) => {
                self.process_guild(source, message, organization_id, command.as_ref(), arguments)
                    .await
            }
            None => {
                self.process_private(source, message, command.as_ref(), arguments)
                    .await
            }
        }
    }

    async fn process_guild(
        &self,
        source: &Source,
        message: &Message,
        organization_id: &str,
        command: &dyn Command,
        arguments: &[&str],
    ) -> Result<Outcome, DispatchError> {
        let definition = command.definition();
        self.sync.request(source.kind(), organization_id);

        let loc = self
            .locales
            .for_organization(&self.store, source.kind(), organization_id)
            .await
            .map_err(DispatchError::Storage)?;
        let channels = self
            .channel_snapshot(source, organization_id, definition)
            .await?;
        let ctx = ScanContext {
            channels: &channels,
        };

        let values = match prepare_values(command, message, arguments, &ctx) {
            Ok(values) => values,
            Err((stage, reason)) => return Ok(rejected(stage, reason, &loc)),
        };

        let authorization = PermissionResolver::new(&self.store)
            .is_authorized(source, message, definition)
            .await?;
        if let Authorization::Denied { axis, permission } = authorization {
            let reason = Rejection::PermissionDenied { axis, permission };
            return Ok(rejected(Stage::PermissionChecked, reason, &loc));
        }

        if !definition.exclusive {
            return self.execute(source, message, command, &loc, values).await;
        }
        let key = format!("{}:{}:{}", source.kind(), organization_id, definition.name);
        let guard = self.locks.acquire(&key).await;
        let outcome = self.execute(source, message, command, &loc, values).await;
        self.locks.release(&key, guard).await;
        outcome
    }

    async fn process_private(
        &self,
        source: &Source,
        message: &Message,
        command: &dyn Command,
        arguments: &[&str],
    ) -> Result<Outcome, DispatchError> {
        let definition = command.definition();
        let loc = self.locales.default_localizer();
        if !definition.allow_private {
            let reason = Rejection::GuildOnly(definition.name.to_string());
            return Ok(rejected(Stage::CommandIdentified, reason, &loc));
        }

        let values = match prepare_values(command, message, arguments, &ScanContext::default()) {
            Ok(values) => values,
            Err((stage, reason)) => return Ok(rejected(stage, reason, &loc)),
        };
        self.execute(source, message, command, &loc, values).await
    }

    async fn execute(
        &self,
        source: &Source,
        message: &Message,
        command: &dyn Command,
        loc: &Localizer,
        values: HashMap<&'static str, ArgValue>,
    ) -> Result<Outcome, DispatchError> {
        let name = command.definition().name;
        let invocation = Invocation::new(message, source, &self.store, &self.locales, loc, values);
        let reply = source
            .execute(command, &invocation)
            .await
            .map_err(|error| match error.downcast::<PlatformError>() {
                Ok(platform) => DispatchError::Platform(platform),
                Err(error) => DispatchError::Internal {
                    command: name,
                    error,
                },
            })?;
        info!("Executed {} for {} ({})", name, message.user_id(), loc.locale());
        Ok(Outcome::Executed {
            command: name,
            reply,
        })
    }

    /// Stored channels of the organization, or a direct listing when nothing
    /// has been synced yet. Only loaded for commands taking channel arguments.
    async fn channel_snapshot(
        &self,
        source: &Source,
        organization_id: &str,
        definition: &CommandDefinition,
    ) -> Result<Vec<ChannelInfo>, DispatchError> {
        if !definition
            .args
            .iter()
            .any(|a| matches!(a.scanner, Scanner::ChannelRef))
        {
            return Ok(Vec::new());
        }
        let channels = self
            .store
            .get_channels(source.kind(), organization_id)
            .await
            .map_err(DispatchError::Storage)?;
        if !channels.is_empty() {
            return Ok(channels);
        }
        debug!("No channel snapshot for {}, listing directly", organization_id);
        Ok(source.client().list_channels(organization_id).await?)
    }
}

fn rejected(stage: Stage, reason: Rejection, loc: &Localizer) -> Outcome {
    info!("Rejected at {:?}: {} ({})", stage, reason, reason.error_code());
    Outcome::Rejected {
        stage,
        reply: reason.message(loc),
        reason,
    }
}

/// Tokens after the prefix, or `None` if the message is not addressed to us.
fn tokenize<'a>(content: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    (!tokens.is_empty()).then_some(tokens)
}

/// Bind, default and validate every argument of `command`.
fn prepare_values(
    command: &dyn Command,
    message: &Message,
    tokens: &[&str],
    ctx: &ScanContext<'_>,
) -> Result<HashMap<&'static str, ArgValue>, (Stage, Rejection)> {
    let definition = command.definition();
    let mut values = bind_arguments(definition, tokens, ctx).map_err(|r| (Stage::ArgsScanned, r))?;

    for (arg, value) in definition.args.iter().zip(values.iter_mut()) {
        if value.is_none() {
            *value = command.default_value(arg, message, ctx).or_else(|| match arg.scanner {
                Scanner::Array(_) => Some(ArgValue::List(Vec::new())),
                _ => None,
            });
        }
    }

    for (arg, value) in definition.args.iter().zip(values.iter()) {
        validate(value.as_ref(), arg.rules).map_err(|failure| {
            let reason = match failure {
                ValidationFailure::Missing => Rejection::MissingArgument(arg.name.to_string()),
                ValidationFailure::Invalid(reason) => Rejection::InvalidArgument {
                    name: arg.name.to_string(),
                    reason,
                },
            };
            (Stage::ArgsValidated, reason)
        })?;
    }

    Ok(definition
        .args
        .iter()
        .zip(values)
        .filter_map(|(arg, value)| value.map(|v| (arg.name, v)))
        .collect())
}

/// Scan `tokens` into one optional value per declared argument.
///
/// Explicitly named tokens (`name:value`, `name=value`, or a bare name
/// followed by its value for named-only arguments) are bound first. The
/// remaining tokens then fill the other arguments in declaration order; an
/// argument that cannot scan the next tokens is left unfilled and the same
/// tokens are offered to the next one.
pub(crate) fn bind_arguments(
    definition: &CommandDefinition,
    tokens: &[&str],
    ctx: &ScanContext<'_>,
) -> Result<Vec<Option<ArgValue>>, Rejection> {
    let mut values: Vec<Option<ArgValue>> = vec![None; definition.args.len()];
    let mut used = vec![false; tokens.len()];

    let mut i = 0;
    while i < tokens.len() {
        let Some((index, inline)) = named_token(definition, tokens[i]) else {
            i += 1;
            continue;
        };
        let arg = &definition.args[index];

        let mut window: Vec<&str> = Vec::new();
        if let Some(inline) = inline {
            window.push(inline);
        }
        window.extend(
            tokens[i + 1..]
                .iter()
                .zip(&used[i + 1..])
                .take_while(|(_, taken)| !**taken)
                .map(|(t, _)| *t),
        );

        let scanned = scan(&window, arg, ctx).map_err(|reason| Rejection::InvalidArgument {
            name: arg.name.to_string(),
            reason,
        })?;
        // the name token plus whatever the value used beyond it
        let span = 1 + scanned.consumed - usize::from(inline.is_some() && scanned.consumed > 0);
        for taken in used.iter_mut().skip(i).take(span) {
            *taken = true;
        }
        values[index] = Some(scanned.value);
        i += span;
    }

    let remaining: Vec<&str> = tokens
        .iter()
        .zip(&used)
        .filter(|(_, taken)| !**taken)
        .map(|(t, _)| *t)
        .collect();
    let mut position = 0;
    for (arg, value) in definition.args.iter().zip(values.iter_mut()) {
        if value.is_some() || arg.skip_in_sequential_read || position >= remaining.len() {
            continue;
        }
        match scan(&remaining[position..], arg, ctx) {
            Ok(scanned) if scanned.consumed > 0 => {
                position += scanned.consumed;
                *value = Some(scanned.value);
            }
            Ok(_) => {}
            Err(reason) => debug!("{} skipped '{}': {:?}", arg.name, remaining[position], reason),
        }
    }
    if position < remaining.len() {
        debug!("Ignoring extra tokens: {:?}", &remaining[position..]);
    }
    Ok(values)
}

/// The argument a token names explicitly, and its inline value if any.
fn named_token<'t>(definition: &CommandDefinition, token: &'t str) -> Option<(usize, Option<&'t str>)> {
    if let Some(split) = token.find([':', '=']).filter(|&at| at > 0) {
        let index = definition.find_arg(&token[..split])?;
        let inline = &token[split + 1..];
        // `role:55` is a subject literal even when an argument is named `role`
        if matches!(definition.args[index].scanner, Scanner::Subject)
            && token[split..].starts_with(':')
            && is_subject_kind(&token[..split])
            && !inline.is_empty()
            && !is_subject_literal(inline)
        {
            return Some((index, Some(token)));
        }
        return Some((index, (!inline.is_empty()).then_some(inline)));
    }
    let index = definition.find_arg(token)?;
    let arg = &definition.args[index];
    let takes_bare_name = arg.skip_in_sequential_read
        && !matches!(arg.scanner, Scanner::Simple(Some(_)) | Scanner::Array(Some(_)));
    takes_bare_name.then_some((index, None))
}

fn is_subject_kind(text: &str) -> bool {
    SubjectKind::parse(&text.to_lowercase()).is_some()
}

fn is_subject_literal(text: &str) -> bool {
    text.starts_with('<') || text.split_once(':').is_some_and(|(kind, _)| is_subject_kind(kind))
}
