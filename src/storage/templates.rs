use anyhow::{Context, Result};
use std::collections::HashMap;

use super::Store;
use crate::platform::SourceKind;

impl Store {
    /// String overrides of one organization, keyed by localization id.
    pub async fn get_templates(
        &self,
        source: SourceKind,
        organization_id: &str,
    ) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT string_id, text FROM templates WHERE source = ?1 AND organization_id = ?2")
            .context("Failed to prepare template query")?;
        let templates = stmt
            .query_map(rusqlite::params![source.name(), organization_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .context("Failed to query templates")?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .context("Failed to collect templates")?;
        Ok(templates)
    }

    pub async fn upsert_template(
        &self,
        source: SourceKind,
        organization_id: &str,
        string_id: &str,
        text: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO templates (source, organization_id, string_id, text)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, organization_id, string_id) DO UPDATE SET text = excluded.text",
            rusqlite::params![source.name(), organization_id, string_id, text],
        )
        .context("Failed to upsert template")?;
        Ok(())
    }

    pub async fn get_locale(&self, source: SourceKind, organization_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let locale: Option<Option<String>> = conn
            .query_row(
                "SELECT locale FROM settings WHERE source = ?1 AND organization_id = ?2",
                rusqlite::params![source.name(), organization_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("Failed to read locale")?;
        Ok(locale.flatten())
    }

    pub async fn set_locale(&self, source: SourceKind, organization_id: &str, locale: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO settings (source, organization_id, locale) VALUES (?1, ?2, ?3)
             ON CONFLICT(source, organization_id) DO UPDATE SET locale = excluded.locale",
            rusqlite::params![source.name(), organization_id, locale],
        )
        .context("Failed to store locale")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locale_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_locale(SourceKind::Slack, "T1").await.unwrap(), None);

        store.set_locale(SourceKind::Slack, "T1", "ru").await.unwrap();
        store.set_locale(SourceKind::Slack, "T1", "en").await.unwrap();
        assert_eq!(
            store.get_locale(SourceKind::Slack, "T1").await.unwrap().as_deref(),
            Some("en")
        );
        assert_eq!(store.get_locale(SourceKind::Discord, "T1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_templates_override_per_organization() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_template(SourceKind::Discord, "g1", "clean.done", "Gone: {0}/{1}")
            .await
            .unwrap();

        let templates = store.get_templates(SourceKind::Discord, "g1").await.unwrap();
        assert_eq!(templates.get("clean.done").map(String::as_str), Some("Gone: {0}/{1}"));
        assert!(store.get_templates(SourceKind::Discord, "g2").await.unwrap().is_empty());
    }
}
