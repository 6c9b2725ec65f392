use tracing::{info, warn};

use crate::platform::SourceKind;
use crate::scheduler::sync::GuildSync;
use crate::scheduler::Scheduler;
use crate::storage::Store;

/// Register built-in background tasks
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    store: Store,
    sync: GuildSync,
    kinds: Vec<SourceKind>,
    guild_sync_cron: &str,
) -> anyhow::Result<()> {
    // Hourly liveness line in the log
    scheduler
        .add_cron_job("0 0 * * * *", "heartbeat", || async {
            info!("Heartbeat: bot is alive");
        })
        .await?;

    // Periodic re-sync of every organization we have seen
    scheduler
        .add_cron_job(guild_sync_cron, "guild-sync", move || {
            let store = store.clone();
            let sync = sync.clone();
            let kinds = kinds.clone();
            async move {
                for kind in kinds {
                    match store.known_organizations(kind).await {
                        Ok(organizations) => {
                            info!("Re-syncing {} {} organization(s)", organizations.len(), kind);
                            for organization_id in organizations {
                                sync.force_request(kind, &organization_id);
                            }
                        }
                        Err(e) => warn!("Failed to list known {} organizations: {:#}", kind, e),
                    }
                }
            }
        })
        .await?;

    Ok(())
}
