//! Periodic durable-store expiry sweep

use crate::manager::CheckpointManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Run [`CheckpointManager::clear_expired`] every `interval`
///
/// The first sweep runs one full interval after spawning. Failures are logged
/// and the loop carries on; abort the returned handle to stop it.
pub fn spawn_expiry_sweeper(manager: Arc<CheckpointManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip first immediate tick

        info!(interval_secs = interval.as_secs(), "Checkpoint expiry sweeper started");

        loop {
            ticker.tick().await;
            match manager.clear_expired().await {
                Ok(Some(removed)) => debug!(removed, "Expiry sweep finished"),
                Ok(None) => debug!("Checkpoints disabled, sweep skipped"),
                Err(e) => warn!(error = %e, "Expiry sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointConfig;
    use checkpoint_store::{
        DocumentStore, FindOptions, Filter, InMemoryDocumentStore, InMemoryKeyValueCache,
        ManualClock,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Map};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_documents() {
        let durable = InMemoryDocumentStore::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
        let manager = Arc::new(CheckpointManager::with_backends(
            CheckpointConfig::enabled(),
            Arc::new(InMemoryKeyValueCache::new()),
            Arc::new(durable.clone()),
            Arc::new(clock.clone()),
        ));

        manager
            .create_checkpoint("job-1", "shop.example.com", Map::new())
            .await
            .unwrap();
        durable
            .insert(json!({"job_id": "old", "expires_at": "2026-04-01T00:00:00.000Z"}).as_object().unwrap().clone())
            .await
            .unwrap();

        let handle = spawn_expiry_sweeper(Arc::clone(&manager), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let remaining = durable.find(&Filter::and(vec![]), &FindOptions::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["job_id"], json!("job-1"));

        handle.abort();
    }
}
