use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::Store;
use crate::permissions::{Subject, SubjectKind};
use crate::platform::SourceKind;

/// One stored, bot-owned authorization rule.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionFilter {
    pub id: String,
    pub source: SourceKind,
    pub organization_id: String,
    pub subject: Subject,
    pub permission: String,
    /// `*` for every command, otherwise a single command name.
    pub filter: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionFilter {
    pub fn new(
        source: SourceKind,
        organization_id: &str,
        subject: Subject,
        permission: &str,
        filter: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            organization_id: organization_id.to_string(),
            subject,
            permission: permission.to_string(),
            filter: filter.to_string(),
            expires_at,
        }
    }
}

/// Which rows `delete_permissions` removes; `None` matches anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionQuery<'a> {
    pub subject: Option<&'a Subject>,
    pub permission: Option<&'a str>,
    pub filter: Option<&'a str>,
}

/// Insert a row or refresh the expiry of an identical rule.
pub(crate) fn upsert_permission_on(conn: &Connection, row: &PermissionFilter) -> Result<()> {
    conn.execute(
        "INSERT INTO permissions
         (id, source, organization_id, subject_kind, subject_id, permission, filter, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(source, organization_id, subject_kind, subject_id, permission, filter)
         DO UPDATE SET expires_at = excluded.expires_at",
        rusqlite::params![
            row.id,
            row.source.name(),
            row.organization_id,
            row.subject.kind.as_str(),
            row.subject.id,
            row.permission,
            row.filter,
            row.expires_at,
        ],
    )
    .context("Failed to upsert permission")?;
    Ok(())
}

impl Store {
    /// All permission rows of one organization.
    pub async fn get_permissions(
        &self,
        source: SourceKind,
        organization_id: &str,
    ) -> Result<Vec<PermissionFilter>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, organization_id, subject_kind, subject_id, permission, filter, expires_at
                 FROM permissions
                 WHERE source = ?1 AND organization_id = ?2
                 ORDER BY created_at ASC, permission ASC",
            )
            .context("Failed to prepare permission query")?;
        let rows = stmt
            .query_map(rusqlite::params![source.name(), organization_id], |row| {
                let kind: String = row.get(2)?;
                let kind = SubjectKind::parse(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown subject kind: {kind}").into(),
                    )
                })?;
                Ok(PermissionFilter {
                    id: row.get(0)?,
                    source,
                    organization_id: row.get(1)?,
                    subject: Subject::new(kind, row.get::<_, String>(3)?),
                    permission: row.get(4)?,
                    filter: row.get(5)?,
                    expires_at: row.get(6)?,
                })
            })
            .context("Failed to query permissions")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect permission rows")?;
        Ok(rows)
    }

    pub async fn upsert_permission(&self, row: &PermissionFilter) -> Result<()> {
        let conn = self.conn.lock().await;
        upsert_permission_on(&conn, row)
    }

    /// Delete matching rows, returning how many were removed.
    pub async fn delete_permissions(
        &self,
        source: SourceKind,
        organization_id: &str,
        query: PermissionQuery<'_>,
    ) -> Result<usize> {
        let mut sql = String::from("DELETE FROM permissions WHERE source = ? AND organization_id = ?");
        let mut params: Vec<String> = vec![source.name().to_string(), organization_id.to_string()];

        if let Some(subject) = query.subject {
            sql.push_str(" AND subject_kind = ? AND subject_id = ?");
            params.push(subject.kind.as_str().to_string());
            params.push(subject.id.clone());
        }
        if let Some(permission) = query.permission {
            sql.push_str(" AND permission = ?");
            params.push(permission.to_string());
        }
        if let Some(filter) = query.filter {
            sql.push_str(" AND filter = ?");
            params.push(filter.to_string());
        }

        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .context("Failed to delete permissions")?;
        Ok(deleted)
    }
}
