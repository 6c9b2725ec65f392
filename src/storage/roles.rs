use anyhow::{Context, Result};

use super::permissions::upsert_permission_on;
use super::{PermissionFilter, Store};
use crate::permissions::{Subject, SubjectKind};
use crate::platform::SourceKind;

/// A platform role whose bot permissions are managed through the `role` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub source: SourceKind,
    pub organization_id: String,
    pub role_id: String,
    pub name: String,
    pub created_by: String,
}

impl Store {
    /// Record the role and grant it every permission in one transaction.
    /// Running it again with the same input leaves the tables unchanged.
    pub async fn upsert_role_with_permissions(
        &self,
        role: &RoleRecord,
        permissions: &[String],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("Failed to begin role transaction")?;

        tx.execute(
            "INSERT INTO roles (source, organization_id, role_id, name, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source, organization_id, role_id) DO UPDATE SET
                name = excluded.name,
                updated_at = datetime('now')",
            rusqlite::params![
                role.source.name(),
                role.organization_id,
                role.role_id,
                role.name,
                role.created_by,
            ],
        )
        .context("Failed to upsert role")?;

        for permission in permissions {
            let row = PermissionFilter::new(
                role.source,
                &role.organization_id,
                Subject::new(SubjectKind::Role, role.role_id.clone()),
                permission,
                "*",
                None,
            );
            upsert_permission_on(&tx, &row)?;
        }

        tx.commit().context("Failed to commit role transaction")?;
        Ok(())
    }

    pub async fn get_roles(&self, source: SourceKind, organization_id: &str) -> Result<Vec<RoleRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT role_id, name, created_by FROM roles
                 WHERE source = ?1 AND organization_id = ?2
                 ORDER BY name ASC",
            )
            .context("Failed to prepare role query")?;
        let roles = stmt
            .query_map(rusqlite::params![source.name(), organization_id], |row| {
                Ok(RoleRecord {
                    source,
                    organization_id: organization_id.to_string(),
                    role_id: row.get(0)?,
                    name: row.get(1)?,
                    created_by: row.get(2)?,
                })
            })
            .context("Failed to query roles")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect roles")?;
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role() -> RoleRecord {
        RoleRecord {
            source: SourceKind::Discord,
            organization_id: "g1".to_string(),
            role_id: "r1".to_string(),
            name: "Moderators".to_string(),
            created_by: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_role_upsert_writes_role_and_permissions() {
        let store = Store::open_in_memory().unwrap();
        let perms = vec!["clean".to_string(), "roles".to_string()];
        store.upsert_role_with_permissions(&role(), &perms).await.unwrap();

        assert_eq!(store.get_roles(SourceKind::Discord, "g1").await.unwrap(), vec![role()]);
        let rows = store.get_permissions(SourceKind::Discord, "g1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|r| r.subject == Subject::new(SubjectKind::Role, "r1")));
    }

    #[tokio::test]
    async fn test_role_upsert_twice_creates_no_duplicates() {
        let store = Store::open_in_memory().unwrap();
        let perms = vec!["clean".to_string()];
        store.upsert_role_with_permissions(&role(), &perms).await.unwrap();

        let mut renamed = role();
        renamed.name = "Mods".to_string();
        store.upsert_role_with_permissions(&renamed, &perms).await.unwrap();

        assert_eq!(store.get_roles(SourceKind::Discord, "g1").await.unwrap(), vec![renamed]);
        assert_eq!(store.get_permissions(SourceKind::Discord, "g1").await.unwrap().len(), 1);
    }
}
