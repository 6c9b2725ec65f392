use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::platform::{discord, slack};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub discord: Option<DiscordConfig>,
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Default command prefix for every platform
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Directory of extra `<code>.toml` locale tables
    #[serde(default)]
    pub locales_dir: Option<PathBuf>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_discord_api")]
    pub api_base: String,
    #[serde(default = "default_discord_limit")]
    pub text_limit: usize,
    /// Overrides `[bot] prefix` for Discord
    #[serde(default)]
    pub prefix: Option<String>,
    /// Shared secret the gateway relay sends in `x-relay-secret`
    #[serde(default)]
    pub relay_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    #[serde(default = "default_slack_api")]
    pub api_base: String,
    #[serde(default = "default_slack_limit")]
    pub text_limit: usize,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Legacy Events API verification token
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_guild_sync_cron")]
    pub guild_sync_cron: String,
    /// Snapshots younger than this are not re-synced on message traffic
    #[serde(default = "default_guild_sync_min_interval")]
    pub guild_sync_min_interval_secs: u64,
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_discord_api() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_discord_limit() -> usize {
    discord::TEXT_LIMIT
}

fn default_slack_api() -> String {
    "https://slack.com/api".to_string()
}

fn default_slack_limit() -> usize {
    slack::TEXT_LIMIT
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cmdbot.db")
}

fn default_guild_sync_cron() -> String {
    "0 */15 * * * *".to_string()
}

fn default_guild_sync_min_interval() -> u64 {
    600
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            default_locale: default_locale(),
            locales_dir: None,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            guild_sync_cron: default_guild_sync_cron(),
            guild_sync_min_interval_secs: default_guild_sync_min_interval(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.discord.is_none() && config.slack.is_none() {
            anyhow::bail!("At least one of [discord] or [slack] must be configured");
        }
        Ok(config)
    }

    pub fn discord_prefix(&self) -> &str {
        self.discord
            .as_ref()
            .and_then(|d| d.prefix.as_deref())
            .unwrap_or(&self.bot.prefix)
    }

    pub fn slack_prefix(&self) -> &str {
        self.slack
            .as_ref()
            .and_then(|s| s.prefix.as_deref())
            .unwrap_or(&self.bot.prefix)
    }
}
