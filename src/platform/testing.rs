//! Recording platform client and a wired-up pipeline for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChannelInfo, FetchedMessage, PlatformClient, SourceKind};
use crate::command::CommandRegistry;
use crate::dispatcher::Dispatcher;
use crate::error::PlatformError;
use crate::locale::Locales;
use crate::scheduler::sync::GuildSync;
use crate::source::Source;
use crate::storage::Store;

#[derive(Default)]
pub struct MockClient {
    sent: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<(String, String)>>,
    history: Mutex<HashMap<String, Vec<FetchedMessage>>>,
    native: Mutex<HashSet<String>>,
    roles: Mutex<Vec<String>>,
    channels: Mutex<Vec<ChannelInfo>>,
    fetches: AtomicUsize,
    channel_lists: AtomicUsize,
    fail_sends: AtomicBool,
}

impl MockClient {
    pub fn grant_native(&self, permission: &str) {
        self.native.lock().unwrap().insert(permission.to_string());
    }

    pub fn set_roles(&self, roles: &[&str]) {
        *self.roles.lock().unwrap() = roles.iter().map(|r| r.to_string()).collect();
    }

    pub fn set_channels(&self, channels: Vec<ChannelInfo>) {
        *self.channels.lock().unwrap() = channels;
    }

    /// Append `count` messages, all posted at `timestamp`, to the old end
    /// of the channel history.
    pub fn push_history(&self, channel_id: &str, count: usize, timestamp: DateTime<Utc>) {
        self.push_history_by(channel_id, "someone", count, timestamp);
    }

    pub fn push_history_by(
        &self,
        channel_id: &str,
        author_id: &str,
        count: usize,
        timestamp: DateTime<Utc>,
    ) {
        let mut history = self.history.lock().unwrap();
        let messages = history.entry(channel_id.to_string()).or_default();
        for _ in 0..count {
            let id = format!("{}-{}", channel_id, messages.len());
            messages.push(FetchedMessage {
                id,
                author_id: author_id.to_string(),
                timestamp,
            });
        }
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn channel_list_count(&self) -> usize {
        self.channel_lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for MockClient {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                platform: "mock",
                status: 500,
                message: "send failed".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<(), PlatformError> {
        let mut deleted = self.deleted.lock().unwrap();
        deleted.extend(ids.iter().map(|id| (channel_id.to_string(), id.clone())));
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<FetchedMessage>, PlatformError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().unwrap();
        let messages = history.get(channel_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = before
            .and_then(|id| messages.iter().position(|m| m.id == id))
            .map_or(0, |i| i + 1);
        Ok(messages.iter().skip(start).take(limit).cloned().collect())
    }

    async fn has_permission_in_channel(
        &self,
        _organization_id: &str,
        _user_id: &str,
        _channel_id: &str,
        permission: &str,
    ) -> Result<bool, PlatformError> {
        Ok(self.native.lock().unwrap().contains(permission))
    }

    async fn member_role_ids(
        &self,
        _organization_id: &str,
        _user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        Ok(self.roles.lock().unwrap().clone())
    }

    async fn list_channels(&self, _organization_id: &str) -> Result<Vec<ChannelInfo>, PlatformError> {
        self.channel_lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.channels.lock().unwrap().clone())
    }
}

pub fn channel(id: &str, name: &str, is_text: bool) -> ChannelInfo {
    ChannelInfo {
        id: id.to_string(),
        name: name.to_string(),
        is_text,
    }
}

pub struct Harness {
    pub store: Store,
    pub source: Arc<Source>,
    pub dispatcher: Dispatcher,
}

/// A Discord source over `client` with the built-in commands, an in-memory
/// store and a channel snapshot for organization `g1`.
pub async fn harness(client: Arc<MockClient>) -> Harness {
    harness_with(client, CommandRegistry::builtin().unwrap()).await
}

pub async fn harness_with(client: Arc<MockClient>, registry: CommandRegistry) -> Harness {
    let store = Store::open_in_memory().unwrap();
    let snapshot = vec![
        channel("c1", "general", true),
        channel("c2", "random", true),
        channel("v1", "Voice", false),
    ];
    store
        .replace_channels(SourceKind::Discord, "g1", &snapshot)
        .await
        .unwrap();
    client.set_channels(snapshot);

    let source = Arc::new(Source::new(
        SourceKind::Discord,
        client,
        registry,
        "!",
        2000,
    ));
    let sources = Arc::new(HashMap::from([(SourceKind::Discord, Arc::clone(&source))]));
    let locales = Arc::new(Locales::load("en", None).unwrap());
    let sync = GuildSync::spawn(sources, store.clone(), std::time::Duration::from_secs(600));

    Harness {
        dispatcher: Dispatcher::new(store.clone(), locales, sync),
        store,
        source,
    }
}
