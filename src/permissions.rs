//! Permission resolution across the platform's native permissions and the
//! bot-owned permission filters stored per organization.
//!
//! Both axes must grant: a command is authorized only if every native
//! permission the Source maps it to is held in the acting channel AND every
//! bot permission it declares is covered by a live stored filter row.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::command::CommandDefinition;
use crate::error::DispatchError;
use crate::platform::{Message, SourceKind};
use crate::source::Source;
use crate::storage::{PermissionFilter, Store};

/// Who a stored permission filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    Role,
    Channel,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Role => "role",
            SubjectKind::Channel => "channel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(SubjectKind::User),
            "role" => Some(SubjectKind::Role),
            "channel" => Some(SubjectKind::Channel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

impl Subject {
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Native permission requirements, named independently of any platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePermission {
    ManageMessages,
    ManageRoles,
    ManageGuild,
}

impl NativePermission {
    /// The permission name the platform's permission query understands.
    pub fn platform_name(&self, source: SourceKind) -> &'static str {
        match (source, self) {
            (SourceKind::Discord, NativePermission::ManageMessages) => "MANAGE_MESSAGES",
            (SourceKind::Discord, NativePermission::ManageRoles) => "MANAGE_ROLES",
            (SourceKind::Discord, NativePermission::ManageGuild) => "MANAGE_GUILD",
            // Slack only distinguishes workspace admins
            (SourceKind::Slack, _) => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAxis {
    Native,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied {
        axis: PermissionAxis,
        permission: String,
    },
}

/// Read-only permission checks for guild messages.
pub struct PermissionResolver<'a> {
    store: &'a Store,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn is_authorized(
        &self,
        source: &Source,
        message: &Message,
        command: &CommandDefinition,
    ) -> Result<Authorization, DispatchError> {
        let (Some(organization_id), Some(channel_id)) =
            (message.organization_id(), message.channel_id())
        else {
            // private messages never reach permission checks
            return Ok(Authorization::Granted);
        };
        let client = source.client();

        for permission in source.command_permissions(command) {
            let held = client
                .has_permission_in_channel(organization_id, message.user_id(), channel_id, permission)
                .await?;
            debug!(
                "Native permission {} for {} in {}: {}",
                permission,
                message.user_id(),
                channel_id,
                held
            );
            if !held {
                return Ok(Authorization::Denied {
                    axis: PermissionAxis::Native,
                    permission: permission.to_string(),
                });
            }
        }

        if command.bot_permissions.is_empty() {
            return Ok(Authorization::Granted);
        }

        let role_ids = client
            .member_role_ids(organization_id, message.user_id())
            .await?;
        let rows = self
            .store
            .get_permissions(source.kind(), organization_id)
            .await
            .map_err(DispatchError::Storage)?;
        let actor = Actor {
            user_id: message.user_id(),
            role_ids: &role_ids,
            channel_id,
        };
        let now = Utc::now();

        for permission in command.bot_permissions {
            if !bot_grants(&rows, &actor, permission, command.name, now) {
                return Ok(Authorization::Denied {
                    axis: PermissionAxis::Bot,
                    permission: permission.to_string(),
                });
            }
        }
        Ok(Authorization::Granted)
    }
}

/// The identities a stored row can match for one invocation.
pub struct Actor<'a> {
    pub user_id: &'a str,
    pub role_ids: &'a [String],
    pub channel_id: &'a str,
}

impl Actor<'_> {
    fn matches(&self, subject: &Subject) -> bool {
        match subject.kind {
            SubjectKind::User => subject.id == self.user_id,
            SubjectKind::Role => self.role_ids.iter().any(|r| *r == subject.id),
            SubjectKind::Channel => subject.id == self.channel_id,
        }
    }
}

/// Whether any live row grants `permission` to `actor` for `command`.
pub fn bot_grants(
    rows: &[PermissionFilter],
    actor: &Actor<'_>,
    permission: &str,
    command: &str,
    now: DateTime<Utc>,
) -> bool {
    rows.iter().any(|row| {
        row.permission == permission
            && (row.filter == "*" || row.filter == command)
            && row.expires_at.map_or(true, |at| at > now)
            && actor.matches(&row.subject)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{harness, MockClient};
    use crate::storage::PermissionFilter;
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn row(subject: Subject, permission: &str, filter: &str) -> PermissionFilter {
        PermissionFilter::new(SourceKind::Discord, "g1", subject, permission, filter, None)
    }

    fn actor<'a>(roles: &'a [String]) -> Actor<'a> {
        Actor {
            user_id: "u1",
            role_ids: roles,
            channel_id: "c1",
        }
    }

    #[test]
    fn test_bot_grants_by_each_subject_kind() {
        let roles = vec!["r1".to_string()];
        let now = Utc::now();
        for subject in [
            Subject::new(SubjectKind::User, "u1"),
            Subject::new(SubjectKind::Role, "r1"),
            Subject::new(SubjectKind::Channel, "c1"),
        ] {
            let rows = vec![row(subject.clone(), "clean", "*")];
            assert!(bot_grants(&rows, &actor(&roles), "clean", "clean", now), "{subject}");
        }

        let rows = vec![row(Subject::new(SubjectKind::User, "u2"), "clean", "*")];
        assert!(!bot_grants(&rows, &actor(&roles), "clean", "clean", now));
    }

    #[test]
    fn test_bot_grants_respects_filter_and_expiry() {
        let roles = Vec::new();
        let now = Utc::now();
        let user = Subject::new(SubjectKind::User, "u1");

        let scoped = vec![row(user.clone(), "clean", "other")];
        assert!(!bot_grants(&scoped, &actor(&roles), "clean", "clean", now));

        let mut expired = row(user.clone(), "clean", "clean");
        expired.expires_at = Some(now - TimeDelta::minutes(1));
        assert!(!bot_grants(&[expired], &actor(&roles), "clean", "clean", now));

        let mut live = row(user, "clean", "clean");
        live.expires_at = Some(now + TimeDelta::minutes(1));
        assert!(bot_grants(&[live], &actor(&roles), "clean", "clean", now));
    }

    #[tokio::test]
    async fn test_native_and_bot_axes_are_conjunctive() {
        for (native_ok, bot_ok) in [(true, true), (true, false), (false, true), (false, false)] {
            let client = Arc::new(MockClient::default());
            if native_ok {
                client.grant_native("MANAGE_MESSAGES");
            }
            let h = harness(client).await;
            if bot_ok {
                h.store
                    .upsert_permission(&row(Subject::new(SubjectKind::User, "u1"), "clean", "*"))
                    .await
                    .unwrap();
            }

            let command = h.source.registry().find("clean").unwrap();
            let message = Message::guild(SourceKind::Discord, "g1", "c1", "u1", "!clean 5m");
            let result = PermissionResolver::new(&h.store)
                .is_authorized(&h.source, &message, command.definition())
                .await
                .unwrap();

            let expected = native_ok && bot_ok;
            assert_eq!(
                result == Authorization::Granted,
                expected,
                "native={native_ok} bot={bot_ok}"
            );
            if !native_ok {
                assert_eq!(
                    result,
                    Authorization::Denied {
                        axis: PermissionAxis::Native,
                        permission: "MANAGE_MESSAGES".to_string()
                    }
                );
            }
        }
    }

    #[tokio::test]
    async fn test_empty_requirements_are_vacuously_granted() {
        let h = harness(Arc::new(MockClient::default())).await;
        let command = h.source.registry().find("help").unwrap();
        let message = Message::guild(SourceKind::Discord, "g1", "c1", "u1", "!help");
        let result = PermissionResolver::new(&h.store)
            .is_authorized(&h.source, &message, command.definition())
            .await
            .unwrap();
        assert_eq!(result, Authorization::Granted);
    }

    #[test]
    fn test_slack_maps_everything_to_admin() {
        assert_eq!(
            NativePermission::ManageRoles.platform_name(SourceKind::Slack),
            "admin"
        );
        assert_eq!(
            NativePermission::ManageGuild.platform_name(SourceKind::Discord),
            "MANAGE_GUILD"
        );
    }
}
