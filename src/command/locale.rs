use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner, ValidationRule};
use crate::permissions::NativePermission;

pub struct Locale {
    definition: CommandDefinition,
}

impl Locale {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("locale", "locale.help")
                .aliases(&["language", "lang"])
                .arg(
                    ArgDef::new("code", Scanner::Simple(None))
                        .rules(&[ValidationRule::NonNull])
                        .help("locale.arg.code"),
                )
                .native(&[NativePermission::ManageGuild])
                .exclusive(),
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Locale {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let code = inv.text("code").context("code was not bound")?.to_lowercase();

        if !inv.locales.has_locale(&code) {
            return Ok(inv
                .loc
                .get_string("locale.unknown", &[code, inv.locales.codes().join(", ")]));
        }

        inv.store
            .set_locale(inv.source.kind(), organization_id, &code)
            .await?;
        // answer in the language just selected
        let loc = inv
            .locales
            .for_organization(inv.store, inv.source.kind(), organization_id)
            .await?;
        Ok(loc.get_string("locale.done", &[code]))
    }
}
