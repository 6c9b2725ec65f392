use anyhow::{Context, Result};
use chrono::Utc;

use super::Store;
use crate::platform::{ChannelInfo, SourceKind};

impl Store {
    /// Replace the channel snapshot of one organization.
    pub async fn replace_channels(
        &self,
        source: SourceKind,
        organization_id: &str,
        channels: &[ChannelInfo],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("Failed to begin channel sync")?;
        tx.execute(
            "DELETE FROM channels WHERE source = ?1 AND organization_id = ?2",
            rusqlite::params![source.name(), organization_id],
        )
        .context("Failed to clear channel snapshot")?;

        let synced_at = Utc::now();
        for channel in channels {
            tx.execute(
                "INSERT INTO channels (source, organization_id, channel_id, name, is_text, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    source.name(),
                    organization_id,
                    channel.id,
                    channel.name,
                    channel.is_text,
                    synced_at,
                ],
            )
            .context("Failed to insert channel")?;
        }
        tx.commit().context("Failed to commit channel sync")?;
        Ok(())
    }

    pub async fn get_channels(&self, source: SourceKind, organization_id: &str) -> Result<Vec<ChannelInfo>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT channel_id, name, is_text FROM channels
                 WHERE source = ?1 AND organization_id = ?2
                 ORDER BY name ASC",
            )
            .context("Failed to prepare channel query")?;
        let channels = stmt
            .query_map(rusqlite::params![source.name(), organization_id], |row| {
                Ok(ChannelInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_text: row.get(2)?,
                })
            })
            .context("Failed to query channels")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect channels")?;
        Ok(channels)
    }

    /// Organizations we have seen, for periodic re-sync.
    pub async fn known_organizations(&self, source: SourceKind) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT organization_id FROM channels WHERE source = ?1
                 UNION
                 SELECT organization_id FROM settings WHERE source = ?1",
            )
            .context("Failed to prepare organization query")?;
        let organizations = stmt
            .query_map(rusqlite::params![source.name()], |row| row.get(0))
            .context("Failed to query organizations")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to collect organizations")?;
        Ok(organizations)
    }
}
