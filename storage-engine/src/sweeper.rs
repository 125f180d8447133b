use std::sync::Arc;
use std::time::Duration;
use tessera::CacheService;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Run `cleanup_expired` every `period` until the handle is aborted.
/// Reads already hide expired entries; this only reclaims space.
pub fn spawn_sweeper(service: Arc<dyn CacheService>, period: Duration) -> JoinHandle<()> {
    info!(
        "Starting expiry sweeper for {} every {:?}",
        service.backend_name(),
        period
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match service.cleanup_expired().await {
                Ok(0) => debug!("Sweep found nothing to remove"),
                Ok(removed) => info!("Sweep removed {} expired entries", removed),
                Err(e) => warn!("Sweep failed on {}: {}", service.backend_name(), e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SledDocumentStore;
    use serde_json::json;
    use shared::TtlSecs;
    use tessera::domain::{CacheEntry, now_utc};
    use tessera::ports::DocumentStore;
    use tessera::{ServicePolicy, TtlCache};

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledDocumentStore::open(dir.path(), "sweep").unwrap());
        let past = now_utc() - chrono::Duration::hours(1);
        let data = json!({"x": 1}).as_object().cloned().unwrap();

        store.save("old", &CacheEntry::new(data.clone(), TtlSecs(1), past).unwrap()).await.unwrap();
        store.save("live", &CacheEntry::new(data, TtlSecs(3600), now_utc()).unwrap()).await.unwrap();

        let service: Arc<dyn CacheService> =
            Arc::new(TtlCache::with_shared_store(store.clone(), ServicePolicy::default()));
        let handle = spawn_sweeper(service, Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.load("live").await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    }
}
