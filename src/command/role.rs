use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{known_permissions, Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner, ValidationRule};
use crate::permissions::{NativePermission, SubjectKind};
use crate::storage::RoleRecord;

/// Registers a platform role as bot-managed and grants it permissions.
pub struct Role {
    definition: CommandDefinition,
}

impl Role {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("role", "role.help")
                .arg(
                    ArgDef::new("role", Scanner::Subject)
                        .rules(&[
                            ValidationRule::NonNull,
                            ValidationRule::SubjectKindIs(SubjectKind::Role),
                        ])
                        .help("role.arg.role"),
                )
                .arg(
                    ArgDef::new("permissions", Scanner::Array(None))
                        .aliases(&["perms"])
                        .rules(&[ValidationRule::IsArray, ValidationRule::NonEmpty])
                        .help("role.arg.permissions"),
                )
                .arg(
                    ArgDef::new("name", Scanner::Simple(None))
                        .skip_sequential()
                        .help("role.arg.name"),
                )
                .native(&[NativePermission::ManageRoles])
                .exclusive(),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Role {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let role = inv.subject("role").context("role was not bound")?;
        let registry = inv.source.registry();

        let permissions = match known_permissions(registry, inv.list("permissions")) {
            Ok(permissions) => permissions,
            Err(unknown) => {
                return Ok(inv.loc.get_string(
                    "permission.unknown",
                    &[unknown, registry.bot_permissions().join(", ")],
                ))
            }
        };

        let record = RoleRecord {
            source: inv.source.kind(),
            organization_id: organization_id.to_string(),
            role_id: role.id.clone(),
            name: inv.text("name").unwrap_or(&role.id).to_string(),
            created_by: inv.message.user_id().to_string(),
        };
        inv.store
            .upsert_role_with_permissions(&record, &permissions)
            .await?;
        info!(
            "Role {} in {} granted {:?} by {}",
            record.role_id, organization_id, permissions, record.created_by
        );

        Ok(inv
            .loc
            .get_string("role.done", &[record.name, permissions.join(", ")]))
    }
}
