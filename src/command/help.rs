use anyhow::Result;
use async_trait::async_trait;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner};

pub struct Help {
    definition: CommandDefinition,
}

impl Help {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("help", "help.help")
                .aliases(&["h", "commands"])
                .arg(ArgDef::new("command", Scanner::Rest).help("help.arg.command"))
                .private(),
        }
    }
}

impl Default for Help {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Help {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let registry = inv.source.registry();
        let prefix = inv.source.prefix();

        if let Some(name) = inv.text("command") {
            let name = name.trim_start_matches(prefix);
            let Some(command) = registry.find(name) else {
                return Ok(inv.loc.get_string("help.unknown", &[name]));
            };
            let definition = command.definition();
            let mut lines = vec![
                inv.loc.get(definition.help),
                inv.loc.get_string("help.usage", &[definition.usage(prefix)]),
            ];
            for arg in &definition.args {
                let mut names = arg.name.to_string();
                for alias in arg.aliases {
                    names.push_str(&format!(", {}", alias));
                }
                lines.push(inv.loc.get_string("help.arg", &[names, inv.loc.get(arg.help)]));
            }
            return Ok(lines.join("\n"));
        }

        let mut lines = vec![inv.loc.get("help.header")];
        for command in registry.commands() {
            let definition = command.definition();
            lines.push(inv.loc.get_string(
                "help.line",
                &[definition.usage(prefix), inv.loc.get(definition.help)],
            ));
        }
        Ok(lines.join("\n"))
    }
}
