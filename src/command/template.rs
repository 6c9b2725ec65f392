use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner, ValidationRule};
use crate::permissions::NativePermission;

/// Per-organization override of a localized message.
pub struct Template {
    definition: CommandDefinition,
}

impl Template {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("template", "template.help")
                .arg(
                    ArgDef::new("id", Scanner::Simple(None))
                        .rules(&[ValidationRule::NonNull])
                        .help("template.arg.id"),
                )
                .arg(
                    ArgDef::new("text", Scanner::Rest)
                        .rules(&[ValidationRule::NonNull, ValidationRule::NonEmpty])
                        .help("template.arg.text"),
                )
                .native(&[NativePermission::ManageGuild])
                .bot(&["templates"])
                .exclusive(),
        }
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Template {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let id = inv.text("id").context("id was not bound")?;
        let text = inv.text("text").context("text was not bound")?;

        inv.store
            .upsert_template(inv.source.kind(), organization_id, id, text)
            .await?;
        info!("Template {} overridden in {}", id, organization_id);
        Ok(inv.loc.get_string("template.done", &[id]))
    }
}
