use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{known_permissions, Command, CommandDefinition, Invocation};
use crate::args::{ArgDef, ArgValue, ScanContext, Scanner, TimePoint, ValidationRule};
use crate::permissions::NativePermission;
use crate::platform::Message;
use crate::storage::PermissionFilter;

pub struct Allow {
    definition: CommandDefinition,
}

impl Allow {
    pub fn new() -> Self {
        Self {
            definition: CommandDefinition::new("allow", "allow.help")
                .aliases(&["grant"])
                .arg(
                    ArgDef::new("subject", Scanner::Subject)
                        .aliases(&["to", "who"])
                        .rules(&[ValidationRule::NonNull])
                        .help("allow.arg.subject"),
                )
                .arg(
                    ArgDef::new("permission", Scanner::Simple(None))
                        .aliases(&["perm"])
                        .rules(&[ValidationRule::NonNull])
                        .help("allow.arg.permission"),
                )
                .arg(
                    ArgDef::new("scope", Scanner::Simple(None))
                        .aliases(&["command"])
                        .help("allow.arg.scope"),
                )
                .arg(
                    ArgDef::new("for", Scanner::TimeDistance)
                        .aliases(&["duration"])
                        .rules(&[ValidationRule::NonZeroShift, ValidationRule::TimeDistanceOnly])
                        .skip_sequential()
                        .help("allow.arg.for"),
                )
                .native(&[NativePermission::ManageGuild])
                .exclusive(),
        }
    }
}

impl Default for Allow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for Allow {
    fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    fn default_value(&self, arg: &ArgDef, _message: &Message, _ctx: &ScanContext<'_>) -> Option<ArgValue> {
        (arg.name == "scope").then(|| ArgValue::Text("*".to_string()))
    }

    async fn execute(&self, inv: &Invocation<'_>) -> Result<String> {
        let organization_id = inv.organization_id()?;
        let subject = inv.subject("subject").context("subject was not bound")?;
        let requested = inv.text("permission").context("permission was not bound")?;
        let registry = inv.source.registry();

        let permission = match known_permissions(registry, [requested]) {
            Ok(mut names) => names.remove(0),
            Err(unknown) => {
                return Ok(inv.loc.get_string(
                    "permission.unknown",
                    &[unknown, registry.bot_permissions().join(", ")],
                ))
            }
        };
        let scope = inv.text("scope").unwrap_or("*").to_lowercase();
        let expires_at = match inv.time("for") {
            Some(TimePoint::Relative(distance)) => Some(Utc::now() + distance.abs()),
            _ => None,
        };

        let row = PermissionFilter::new(
            inv.source.kind(),
            organization_id,
            subject.clone(),
            &permission,
            &scope,
            expires_at,
        );
        inv.store.upsert_permission(&row).await?;
        info!(
            "Granted {} to {} in {} (scope {}, expires {:?})",
            permission, subject, organization_id, scope, expires_at
        );

        let subject = subject.to_string();
        Ok(match expires_at {
            Some(at) => inv.loc.get_string(
                "allow.done_until",
                &[permission, subject, scope, at.format("%Y-%m-%d %H:%M UTC").to_string()],
            ),
            None => inv.loc.get_string("allow.done", &[permission, subject, scope]),
        })
    }
}
