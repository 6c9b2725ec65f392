//! Localized user-facing strings.
//!
//! Tables are flat TOML files (`"id" = "text with {0} placeholders"`). English
//! and Russian ship with the binary; more locales can be dropped into the
//! configured directory. Lookup order: organization template override,
//! organization locale, default locale, then the id itself.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::platform::SourceKind;
use crate::storage::Store;

const BUILTIN: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en.toml")),
    ("ru", include_str!("../locales/ru.toml")),
];

type Table = HashMap<String, String>;

/// Every installed locale table.
pub struct Locales {
    tables: HashMap<String, Table>,
    default_locale: String,
}

impl Locales {
    /// Built-in tables plus any `<code>.toml` found in `dir`.
    pub fn load(default_locale: &str, dir: Option<&Path>) -> Result<Self> {
        let mut tables = HashMap::new();
        for (code, content) in BUILTIN {
            let table: Table = toml::from_str(content)
                .with_context(|| format!("Failed to parse built-in locale {}", code))?;
            tables.insert(code.to_string(), table);
        }

        if let Some(dir) = dir {
            for entry in std::fs::read_dir(dir)
                .with_context(|| format!("Failed to read locales directory: {}", dir.display()))?
            {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read locale file: {}", path.display()))?;
                let extra: Table = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse locale file: {}", path.display()))?;
                info!("Loaded locale '{}' ({} strings)", code, extra.len());
                tables.entry(code.to_string()).or_default().extend(extra);
            }
        }

        if !tables.contains_key(default_locale) {
            anyhow::bail!("Default locale '{}' is not installed", default_locale);
        }

        Ok(Self {
            tables,
            default_locale: default_locale.to_string(),
        })
    }

    pub fn has_locale(&self, code: &str) -> bool {
        self.tables.contains_key(code)
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Localizer for the default locale without organization overrides.
    pub fn default_localizer(self: &Arc<Self>) -> Localizer {
        Localizer {
            locales: Arc::clone(self),
            locale: self.default_locale.clone(),
            overrides: HashMap::new(),
        }
    }

    /// Localizer honoring the organization's locale and template overrides.
    pub async fn for_organization(
        self: &Arc<Self>,
        store: &Store,
        source: SourceKind,
        organization_id: &str,
    ) -> Result<Localizer> {
        let locale = store
            .get_locale(source, organization_id)
            .await?
            .filter(|code| {
                let installed = self.has_locale(code);
                if !installed {
                    warn!("Organization {} uses missing locale '{}'", organization_id, code);
                }
                installed
            })
            .unwrap_or_else(|| self.default_locale.clone());
        let overrides = store.get_templates(source, organization_id).await?;
        Ok(Localizer {
            locales: Arc::clone(self),
            locale,
            overrides,
        })
    }
}

/// String lookup bound to one locale and one organization's overrides.
#[derive(Clone)]
pub struct Localizer {
    locales: Arc<Locales>,
    locale: String,
    overrides: Table,
}

impl Localizer {
    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn get(&self, id: &str) -> String {
        self.get_string::<&str>(id, &[])
    }

    pub fn get_string<S: AsRef<str>>(&self, id: &str, args: &[S]) -> String {
        let template = self
            .overrides
            .get(id)
            .or_else(|| self.locales.tables.get(&self.locale).and_then(|t| t.get(id)))
            .or_else(|| {
                self.locales
                    .tables
                    .get(&self.locales.default_locale)
                    .and_then(|t| t.get(id))
            })
            .map(String::as_str)
            .unwrap_or(id);
        fill(template, args)
    }
}

/// Replace `{0}`, `{1}`, … with the given arguments. Unknown indexes are
/// left as written.
fn fill<S: AsRef<str>>(template: &str, args: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            let arg = args.get(index)?;
            Some((arg.as_ref(), close))
        });
        match replaced {
            Some((arg, close)) => {
                out.push_str(arg);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locales() -> Arc<Locales> {
        Arc::new(Locales::load("en", None).unwrap())
    }

    #[test]
    fn test_fill_placeholders() {
        assert_eq!(fill("({0}) out of ({1})", &["3", "5"]), "(3) out of (5)");
        assert_eq!(fill("{1}{0}{1}", &["a", "b"]), "bab");
        assert_eq!(fill("keep {x} and {7}", &["a"]), "keep {x} and {7}");
        assert_eq!(fill("{", &["a"]), "{");
    }

    #[test]
    fn test_builtin_locales_share_keys() {
        let locales = locales();
        let en = &locales.tables["en"];
        let ru = &locales.tables["ru"];
        for key in en.keys() {
            assert!(ru.contains_key(key), "ru is missing {key}");
        }
        assert_eq!(locales.codes(), vec!["en", "ru"]);
    }

    #[test]
    fn test_missing_argument_text() {
        let loc = locales().default_localizer();
        assert_eq!(
            loc.get_string("arg.missing", &["time"]),
            "You did not specify any value for argument: time"
        );
        assert_eq!(loc.get("no.such.id"), "no.such.id");
    }

    #[test]
    fn test_unknown_default_locale_is_an_error() {
        assert!(Locales::load("xx", None).is_err());
    }

    #[tokio::test]
    async fn test_organization_locale_and_overrides() {
        let locales = locales();
        let store = Store::open_in_memory().unwrap();
        store.set_locale(SourceKind::Discord, "g1", "ru").await.unwrap();
        store
            .upsert_template(SourceKind::Discord, "g1", "error.internal", "oops")
            .await
            .unwrap();

        let loc = locales
            .for_organization(&store, SourceKind::Discord, "g1")
            .await
            .unwrap();
        assert_eq!(loc.locale(), "ru");
        assert_eq!(loc.get("error.internal"), "oops");
        assert_eq!(
            loc.get_string("arg.missing", &["time"]),
            "Вы не указали значение для аргумента: time"
        );

        let other = locales
            .for_organization(&store, SourceKind::Discord, "g2")
            .await
            .unwrap();
        assert_eq!(other.locale(), "en");
    }
}
