pub mod channels;
pub mod permissions;
pub mod roles;
pub mod templates;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use permissions::{PermissionFilter, PermissionQuery};
pub use roles::RoleRecord;

/// Thread-safe SQLite store for everything the bot owns per organization.
/// Rows are keyed by (source, organization_id, entity id).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Migrate before wrapping in the async Mutex so we never block_lock
        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- Bot-owned permission filters
            CREATE TABLE IF NOT EXISTS permissions (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                subject_kind TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                filter TEXT NOT NULL DEFAULT '*',
                expires_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_permissions_rule
                ON permissions(source, organization_id, subject_kind, subject_id, permission, filter);

            -- Roles the bot manages permissions for
            CREATE TABLE IF NOT EXISTS roles (
                source TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (source, organization_id, role_id)
            );

            -- Per-organization overrides of localized strings
            CREATE TABLE IF NOT EXISTS templates (
                source TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                string_id TEXT NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (source, organization_id, string_id)
            );

            -- Per-organization settings
            CREATE TABLE IF NOT EXISTS settings (
                source TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                locale TEXT,
                PRIMARY KEY (source, organization_id)
            );

            -- Channel snapshots maintained by the guild sync task
            CREATE TABLE IF NOT EXISTS channels (
                source TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_text INTEGER NOT NULL,
                synced_at TEXT NOT NULL,
                PRIMARY KEY (source, organization_id, channel_id)
            );
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }
}
