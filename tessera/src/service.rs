use crate::domain::{now_utc, CacheEntry, EntryMetadata, Payload};
use crate::ports::{CacheService, DocumentStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::config::CacheConfig;
use shared::{Result, TtlSecs};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Knobs that decide how the service treats TTLs and failures
#[derive(Clone, Debug)]
pub struct ServicePolicy {
    pub default_ttl: TtlSecs,
    pub strict_writes: bool,
    pub cleanup_batch_size: usize,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            default_ttl: TtlSecs::DEFAULT,
            strict_writes: false,
            cleanup_batch_size: 500,
        }
    }
}

impl From<&CacheConfig> for ServicePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            strict_writes: config.strict_writes,
            cleanup_batch_size: config.cleanup_batch_size,
        }
    }
}

/// TTL-enforcing cache service over any document store.
///
/// Liveness is decided here on every read by comparing `expires_at` with
/// the wall clock, independent of whatever native expiry the store has.
/// Expired records found on a read are evicted before the miss is returned.
pub struct TtlCache<S: DocumentStore> {
    store: Arc<S>,
    policy: ServicePolicy,
}

impl<S: DocumentStore> TtlCache<S> {
    pub fn new(store: S, policy: ServicePolicy) -> Self {
        Self::with_shared_store(Arc::new(store), policy)
    }

    pub fn with_shared_store(store: Arc<S>, policy: ServicePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    async fn evict(&self, key: &str, now: DateTime<Utc>) {
        match self.store.evict_if_expired(key, now).await {
            Ok(true) => debug!(backend = self.store.name(), key, "evicted expired entry on read"),
            Ok(false) => {}
            Err(e) => warn!(
                backend = self.store.name(),
                key,
                error = %e,
                "failed to evict expired entry"
            ),
        }
    }

    /// Fire-and-forget `last_accessed` bookkeeping; never delays or fails the read.
    fn spawn_touch(&self, key: &str, now: DateTime<Utc>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key, "no runtime available, skipping access-time update");
            return;
        };

        let store = Arc::clone(&self.store);
        let key = key.to_string();
        handle.spawn(async move {
            if let Err(e) = store.touch(&key, now, now).await {
                debug!(backend = store.name(), key = %key, error = %e, "access-time update failed");
            }
        });
    }

    fn write_outcome(&self, operation: &'static str, key: &str, result: Result<bool>) -> Result<bool> {
        match result {
            Ok(done) => Ok(done),
            Err(e) if self.policy.strict_writes => {
                error!(backend = self.store.name(), operation, key, error = %e, "cache write failed");
                Err(e)
            }
            Err(e) => {
                warn!(
                    backend = self.store.name(),
                    operation,
                    key,
                    error = %e,
                    "cache write failed, continuing without it"
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl<S: DocumentStore> CacheService for TtlCache<S> {
    async fn get(&self, key: &str) -> Option<Payload> {
        let entry = match self.store.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(backend = self.store.name(), operation = "get", key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let now = now_utc();
        if entry.is_expired_at(now) {
            self.evict(key, now).await;
            return None;
        }

        self.spawn_touch(key, now);
        Some(entry.data)
    }

    async fn set(&self, key: &str, payload: Payload, ttl: Option<TtlSecs>) -> Result<bool> {
        let ttl = ttl.unwrap_or(self.policy.default_ttl).validate()?;
        let entry = CacheEntry::new(payload, ttl, now_utc())?;

        let result = self.store.save(key, &entry).await.map(|_| true);
        self.write_outcome("set", key, result)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = self.store.remove(key).await;
        self.write_outcome("delete", key, result)
    }

    async fn exists(&self, key: &str) -> bool {
        let timestamps = match self.store.load_timestamps(key).await {
            Ok(Some(timestamps)) => timestamps,
            Ok(None) => return false,
            Err(e) => {
                warn!(backend = self.store.name(), operation = "exists", key, error = %e, "cache read failed, treating as miss");
                return false;
            }
        };

        let now = now_utc();
        if timestamps.is_expired_at(now) {
            self.evict(key, now).await;
            return false;
        }
        true
    }

    async fn update_access_time(&self, key: &str) -> bool {
        let now = now_utc();
        match self.store.touch(key, now, now).await {
            Ok(touched) => touched,
            Err(e) => {
                warn!(backend = self.store.name(), operation = "update_access_time", key, error = %e, "access-time update failed");
                false
            }
        }
    }

    async fn get_metadata(&self, key: &str) -> Option<EntryMetadata> {
        match self.store.load_timestamps(key).await {
            Ok(timestamps) => timestamps.map(|t| t.metadata_at(now_utc())),
            Err(e) => {
                warn!(backend = self.store.name(), operation = "get_metadata", key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self
            .store
            .purge_expired(now_utc(), self.policy.cleanup_batch_size)
            .await?;
        if removed > 0 {
            info!(backend = self.store.name(), removed, "removed expired cache entries");
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        self.store.name()
    }
}

impl<S: DocumentStore> Debug for TtlCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("backend", &self.store.name())
            .field("policy", &self.policy)
            .finish()
    }
}
