use anyhow::Result;
use async_trait::async_trait;

use super::{Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, Scanner, TableValue, ValueTable};
use crate::permissions::NativePermission;

const KINDS: ValueTable = &[
    ("users", TableValue::Text("user")),
    ("user", TableValue::Text("user")),
    ("roles", TableValue::Text("role")),
    ("role", TableValue::Text("role")),
    ("channels", TableValue::Text("channel")),
    ("channel", TableValue::Text("channel")),
];

pub struct Permissions {
    definition: CommandDefinition,
}

impl Permissions {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("permissions", "perms.help")
                .aliases(&["perms"])
                .arg(ArgDef::new("kind", Scanner::Simple(Some(KINDS))).help("perms.arg.kind"))
                .native(&[NativePermission::ManageGuild]),
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Permissions {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let kind = inv.source.kind();
        let mut rows = inv.store.get_permissions(kind, organization_id).await?;
        let roles = inv.store.get_roles(kind, organization_id).await?;
        if let Some(only) = inv.text("kind") {
            rows.retain(|row| row.subject.kind.as_str() == only);
        }

        if rows.is_empty() {
            return Ok(inv.loc.get("perms.empty"));
        }

        let mut lines = vec![inv.loc.get("perms.header")];
        for row in rows {
            let subject = row.subject.to_string();
            lines.push(match row.expires_at {
                Some(at) => inv.loc.get_string(
                    "perms.line_until",
                    &[
                        subject,
                        row.permission,
                        row.filter,
                        at.format("%Y-%m-%d %H:%M UTC").to_string(),
                    ],
                ),
                None => inv
                    .loc
                    .get_string("perms.line", &[subject, row.permission, row.filter]),
            });
        }
        if !roles.is_empty() {
            let names: Vec<String> = roles
                .iter()
                .map(|r| format!("{} ({})", r.name, r.role_id))
                .collect();
            lines.push(inv.loc.get_string("perms.roles", &[names.join(", ")]));
        }
        Ok(lines.join("\n"))
    }
}
