//! Command model: static definitions, the registry that finds them, and the
//! bound invocation a command body runs against.

pub mod allow;
pub mod clean;
pub mod help;
pub mod locale;
pub mod perms;
pub mod revoke;
pub mod role;
pub mod template;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::args::{ArgDef, ArgValue, ScanContext, TimePoint};
use crate::locale::{Locales, Localizer};
use crate::permissions::{NativePermission, Subject};
use crate::platform::{ChannelInfo, Message};
use crate::source::Source;
use crate::storage::Store;

/// Everything the pipeline needs to know about a command before running it.
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub args: Vec<ArgDef>,
    pub native_permissions: &'static [NativePermission],
    pub bot_permissions: &'static [&'static str],
    /// May run from a direct message.
    pub allow_private: bool,
    /// Serialized per organization.
    pub exclusive: bool,
    /// Localization id of the one-line description.
    pub help: &'static str,
}

impl CommandDefinition {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            aliases: &[],
            args: Vec::new(),
            native_permissions: &[],
            bot_permissions: &[],
            allow_private: false,
            exclusive: false,
            help,
        }
    }

    pub fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn arg(mut self, arg: ArgDef) -> Self {
        self.args.push(arg);
        self
    }

    pub fn native(mut self, permissions: &'static [NativePermission]) -> Self {
        self.native_permissions = permissions;
        self
    }

    pub fn bot(mut self, permissions: &'static [&'static str]) -> Self {
        self.bot_permissions = permissions;
        self
    }

    pub fn private(mut self) -> Self {
        self.allow_private = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Index of the argument `token` names, by name or alias.
    pub fn find_arg(&self, token: &str) -> Option<usize> {
        let token = token.to_lowercase();
        self.args.iter().position(|a| a.is_named(&token))
    }

    /// `prefix + name <arg> <arg>` for help output.
    pub fn usage(&self, prefix: &str) -> String {
        let mut usage = format!("{}{}", prefix, self.name);
        for arg in &self.args {
            if arg.skip_in_sequential_read {
                usage.push_str(&format!(" [{}:…]", arg.name));
            } else {
                usage.push_str(&format!(" <{}>", arg.name));
            }
        }
        usage
    }

    fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for arg in &self.args {
            for token in std::iter::once(arg.name).chain(arg.aliases.iter().copied()) {
                if !seen.insert(token.to_lowercase()) {
                    bail!("Command {} declares argument token '{}' twice", self.name, token);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn definition(&self) -> &CommandDefinition;

    /// Value for an argument the message did not supply.
    fn default_value(
        &self,
        _arg: &ArgDef,
        _message: &Message,
        _ctx: &ScanContext<'_>,
    ) -> Option<ArgValue> {
        None
    }

    /// Run the command. An empty string means nothing is sent back.
    async fn execute(&self, invocation: &Invocation<'_>) -> Result<String>;
}

/// Commands of one Source, looked up by name or alias.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    names: HashMap<String, usize>,
    longest_name: usize,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in command.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(help::Help::new()))?;
        registry.register(Arc::new(clean::Clean::new()))?;
        registry.register(Arc::new(allow::Allow::new()))?;
        registry.register(Arc::new(revoke::Revoke::new()))?;
        registry.register(Arc::new(role::Role::new()))?;
        registry.register(Arc::new(perms::Permissions::new()))?;
        registry.register(Arc::new(locale::Locale::new()))?;
        registry.register(Arc::new(template::Template::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let definition = command.definition();
        definition.check()?;

        let index = self.commands.len();
        for name in std::iter::once(definition.name).chain(definition.aliases.iter().copied()) {
            let key = name
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if self.names.insert(key.clone(), index).is_some() {
                bail!("Command name '{}' is registered twice", key);
            }
            self.longest_name = self.longest_name.max(key.split(' ').count());
        }
        self.commands.push(command);
        Ok(())
    }

    /// The command named by the leading tokens, preferring the longest
    /// match, and how many tokens its name used.
    pub fn identify(&self, tokens: &[&str]) -> Option<(Arc<dyn Command>, usize)> {
        for used in (1..=self.longest_name.min(tokens.len())).rev() {
            let key = tokens[..used].join(" ").to_lowercase();
            if let Some(&index) = self.names.get(&key) {
                return Some((Arc::clone(&self.commands[index]), used));
            }
        }
        None
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Command>> {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        self.identify(&tokens)
            .filter(|(_, used)| *used == tokens.len())
            .map(|(command, _)| command)
    }

    pub fn commands(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    /// Every bot permission some command checks, sorted.
    pub fn bot_permissions(&self) -> Vec<&'static str> {
        let mut permissions: Vec<&'static str> = self
            .commands
            .iter()
            .flat_map(|c| c.definition().bot_permissions.iter().copied())
            .collect();
        permissions.sort_unstable();
        permissions.dedup();
        permissions
    }
}

/// A command bound to one message with every argument scanned, defaulted
/// and validated.
pub struct Invocation<'a> {
    pub message: &'a Message,
    pub source: &'a Source,
    pub store: &'a Store,
    pub locales: &'a Arc<Locales>,
    pub loc: &'a Localizer,
    values: HashMap<&'static str, ArgValue>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        message: &'a Message,
        source: &'a Source,
        store: &'a Store,
        locales: &'a Arc<Locales>,
        loc: &'a Localizer,
        values: HashMap<&'static str, ArgValue>,
    ) -> Self {
        Self {
            message,
            source,
            store,
            locales,
            loc,
            values,
        }
    }

    /// Organization of the message; only private-capable commands may see `None`.
    pub fn organization_id(&self) -> Result<&'a str> {
        self.message
            .organization_id()
            .context("command requires an organization")
    }

    pub fn value(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(ArgValue::as_text)
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.value(name), Some(ArgValue::Bool(true)))
    }

    pub fn time(&self, name: &str) -> Option<TimePoint> {
        match self.value(name) {
            Some(ArgValue::Time(point)) => Some(*point),
            _ => None,
        }
    }

    pub fn channels(&self, name: &str) -> &[ChannelInfo] {
        match self.value(name) {
            Some(ArgValue::Channels(channels)) => channels,
            _ => &[],
        }
    }

    pub fn subject(&self, name: &str) -> Option<&Subject> {
        match self.value(name) {
            Some(ArgValue::Subject(subject)) => Some(subject),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Vec<&str> {
        match self.value(name) {
            Some(ArgValue::List(items)) => items.iter().filter_map(ArgValue::as_text).collect(),
            _ => Vec::new(),
        }
    }
}

/// Bot permission names, lowercased and checked against what the registry
/// knows. Returns the first unknown name as the error.
pub(crate) fn known_permissions<'t>(
    registry: &CommandRegistry,
    names: impl IntoIterator<Item = &'t str>,
) -> std::result::Result<Vec<String>, String> {
    let known = registry.bot_permissions();
    names
        .into_iter()
        .map(|name| {
            let name = name.to_lowercase();
            if known.contains(&name.as_str()) {
                Ok(name)
            } else {
                Err(name)
            }
        })
        .collect()
}
