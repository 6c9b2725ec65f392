mod args;
mod bot;
mod command;
mod config;
mod dispatcher;
mod error;
mod locale;
mod permissions;
mod platform;
mod scheduler;
mod server;
mod source;
mod storage;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Bot;
use crate::command::CommandRegistry;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::locale::Locales;
use crate::platform::discord::DiscordClient;
use crate::platform::slack::SlackClient;
use crate::platform::SourceKind;
use crate::scheduler::sync::GuildSync;
use crate::scheduler::Scheduler;
use crate::server::IngestState;
use crate::source::Source;
use crate::storage::Store;

const EVENT_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cmdbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Discord: {}", config.discord.is_some());
    info!("  Slack: {}", config.slack.is_some());
    info!("  Database: {}", config.database.path.display());
    info!("  Default locale: {}", config.bot.default_locale);

    let store = Store::open(&config.database.path)?;
    let locales = Arc::new(Locales::load(
        &config.bot.default_locale,
        config.bot.locales_dir.as_deref(),
    )?);
    let timeout = Duration::from_secs(config.bot.http_timeout_secs);

    let mut sources = HashMap::new();
    if let Some(discord) = &config.discord {
        let client = Arc::new(DiscordClient::new(discord, timeout)?);
        let source = Source::new(
            SourceKind::Discord,
            client,
            CommandRegistry::builtin()?,
            config.discord_prefix(),
            discord.text_limit,
        );
        sources.insert(SourceKind::Discord, Arc::new(source));
    }
    if let Some(slack) = &config.slack {
        let client = Arc::new(SlackClient::new(slack, timeout)?);
        let source = Source::new(
            SourceKind::Slack,
            client,
            CommandRegistry::builtin()?,
            config.slack_prefix(),
            slack.text_limit,
        );
        sources.insert(SourceKind::Slack, Arc::new(source));
    }
    let sources = Arc::new(sources);
    let kinds: Vec<SourceKind> = sources.keys().copied().collect();

    // Background channel reconciliation
    let sync = GuildSync::spawn(
        Arc::clone(&sources),
        store.clone(),
        Duration::from_secs(config.scheduler.guild_sync_min_interval_secs),
    );

    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_builtin_tasks(
        &scheduler,
        store.clone(),
        sync.clone(),
        kinds,
        &config.scheduler.guild_sync_cron,
    )
    .await?;
    scheduler.start().await?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let ingest = IngestState {
        events: events_tx,
        slack_token: config
            .slack
            .as_ref()
            .and_then(|s| s.verification_token.as_deref())
            .map(Arc::from),
        discord_secret: config
            .discord
            .as_ref()
            .and_then(|d| d.relay_secret.as_deref())
            .map(Arc::from),
    };
    let router = server::router(ingest, config.slack.is_some(), config.discord.is_some());

    let bot = Arc::new(Bot::new(
        Arc::clone(&sources),
        Dispatcher::new(store, locales, sync),
    ));
    let worker = tokio::spawn(bot::run(bot, events_rx));

    info!("Bot is starting...");
    server::serve(&config.server.listen, router).await?;

    // the router owned the last sender, so the worker drains and stops
    match worker.await {
        Ok(Err(e)) => error!("Event loop failed: {:#}", e),
        Err(e) => error!("Event loop panicked: {}", e),
        Ok(Ok(())) => {}
    }
    scheduler.shutdown().await?;

    Ok(())
}
