use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner, ValidationRule};
use crate::permissions::NativePermission;
use crate::storage::PermissionQuery;

pub struct Revoke {
    definition: CommandDefinition,
}

impl Revoke {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("revoke", "revoke.help")
                .aliases(&["deny"])
                .arg(
                    ArgDef::new("subject", Scanner::Subject)
                        .aliases(&["from", "who"])
                        .rules(&[ValidationRule::NonNull])
                        .help("revoke.arg.subject"),
                )
                .arg(
                    ArgDef::new("permission", Scanner::Simple(None))
                        .aliases(&["perm"])
                        .help("revoke.arg.permission"),
                )
                .arg(
                    ArgDef::new("scope", Scanner::Simple(None))
                        .aliases(&["command"])
                        .help("revoke.arg.scope"),
                )
                .native(&[NativePermission::ManageGuild])
                .exclusive(),
        }
    }
}

impl Default for Revoke {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Revoke {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let subject = inv.subject("subject").context("subject was not bound")?;
        let permission = inv.text("permission").map(str::to_lowercase);
        let scope = inv.text("scope").map(str::to_lowercase);

        let removed = inv
            .store
            .delete_permissions(
                inv.source.kind(),
                organization_id,
                PermissionQuery {
                    subject: Some(subject),
                    permission: permission.as_deref(),
                    filter: scope.as_deref(),
                },
            )
            .await?;
        info!("Revoked {} grant(s) from {} in {}", removed, subject, organization_id);

        let subject = subject.to_string();
        Ok(if removed == 0 {
            inv.loc.get_string("revoke.none", &[subject])
        } else {
            inv.loc.get_string("revoke.done", &[removed.to_string(), subject])
        })
    }
}
