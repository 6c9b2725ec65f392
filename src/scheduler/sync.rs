//! Background reconciliation of per-organization channel snapshots.
//!
//! Message handling only calls [`GuildSync::request`], which never waits: the
//! request is queued and a single worker task fetches the channel list and
//! replaces the stored snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::platform::SourceKind;
use crate::source::{Source, Sources};
use crate::storage::Store;

const QUEUE_CAPACITY: usize = 256;

type Key = (SourceKind, String);

#[derive(Default)]
struct SyncState {
    pending: HashSet<Key>,
    synced: HashMap<Key, Instant>,
}

/// Handle for requesting organization syncs.
#[derive(Clone)]
pub struct GuildSync {
    tx: mpsc::Sender<Key>,
    state: Arc<Mutex<SyncState>>,
    min_interval: Duration,
}

impl GuildSync {
    /// Start the worker. Organizations synced less than `min_interval` ago
    /// are not synced again on a plain request.
    pub fn spawn(sources: Sources, store: Store, min_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Key>(QUEUE_CAPACITY);
        let state = Arc::new(Mutex::new(SyncState::default()));

        let worker_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(key) = rx.recv().await {
                let (kind, organization_id) = &key;
                let Some(source) = sources.get(kind) else {
                    warn!("Guild sync requested for unconfigured source {}", kind);
                    forget(&worker_state, &key);
                    continue;
                };
                match sync_organization(source, &store, organization_id).await {
                    Ok(count) => {
                        debug!("Synced {} channel(s) for {} {}", count, kind, organization_id);
                        if let Ok(mut state) = worker_state.lock() {
                            state.synced.insert(key.clone(), Instant::now());
                        }
                    }
                    Err(e) => warn!("Guild sync failed for {} {}: {:#}", kind, organization_id, e),
                }
                forget(&worker_state, &key);
            }
            info!("Guild sync worker stopped");
        });

        Self {
            tx,
            state,
            min_interval,
        }
    }

    /// Queue a sync unless one is pending or the snapshot is fresh.
    pub fn request(&self, kind: SourceKind, organization_id: &str) {
        self.enqueue(kind, organization_id, false);
    }

    /// Queue a sync even if the snapshot is fresh.
    pub fn force_request(&self, kind: SourceKind, organization_id: &str) {
        self.enqueue(kind, organization_id, true);
    }

    fn enqueue(&self, kind: SourceKind, organization_id: &str, force: bool) {
        let key = (kind, organization_id.to_string());
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let fresh = state
                .synced
                .get(&key)
                .is_some_and(|at| at.elapsed() < self.min_interval);
            if (fresh && !force) || !state.pending.insert(key.clone()) {
                return;
            }
        }

        if let Err(e) = self.tx.try_send(key.clone()) {
            warn!("Dropping guild sync for {} {}: {}", kind, organization_id, e);
            forget(&self.state, &key);
        }
    }
}

fn forget(state: &Mutex<SyncState>, key: &Key) {
    if let Ok(mut state) = state.lock() {
        state.pending.remove(key);
    }
}

/// Fetch the organization's channels and store them as its snapshot.
pub async fn sync_organization(source: &Source, store: &Store, organization_id: &str) -> Result<usize> {
    let channels = source
        .client()
        .list_channels(organization_id)
        .await
        .with_context(|| format!("Failed to list channels of {}", organization_id))?;
    store
        .replace_channels(source.kind(), organization_id, &channels)
        .await?;
    Ok(channels.len())
}
