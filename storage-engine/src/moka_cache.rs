use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use shared::Result;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tessera::domain::{now_utc, CacheEntry, EntryTimestamps};
use tessera::ports::DocumentStore;

/// How long moka keeps an entry past its `expires_at` before dropping it natively.
const RETENTION_AFTER_EXPIRY: Duration = Duration::from_secs(300);

/// Drops each entry a grace period after its own `expires_at`.
///
/// Until then an expired entry stays visible, like a document in the
/// on-disk store: metadata reports it as expired and the service's lazy
/// eviction or `purge_expired` removes it. Moka's native expiry only
/// reclaims what nothing else did.
struct EntryExpiry;

impl EntryExpiry {
    fn until(entry: &CacheEntry) -> Option<Duration> {
        let remaining = (entry.expires_at - now_utc()).to_std().unwrap_or(Duration::ZERO);
        Some(remaining.saturating_add(RETENTION_AFTER_EXPIRY))
    }
}

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Self::until(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::until(value)
    }
}

/// Moka-based in-memory document store
/// Provides lock-free, concurrent storage with optional size bounds and per-entry expiry.
/// Expired entries behave as in the other stores until `RETENTION_AFTER_EXPIRY` runs out.
pub struct MokaDocumentStore {
    cache: Cache<String, CacheEntry>,
}

impl MokaDocumentStore {
    /// Create a new unbounded store
    pub fn new_unbounded() -> Self {
        Self::new("cache_sessions", None)
    }

    /// Create a new store with an optional entry bound
    pub fn new(name: &str, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name(name).expire_after(EntryExpiry);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl DocumentStore for MokaDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.cache.get(key).await)
    }

    async fn load_timestamps(&self, key: &str) -> Result<Option<EntryTimestamps>> {
        Ok(self.cache.get(key).await.map(|entry| entry.timestamps()))
    }

    async fn save(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.cache.insert(key.to_string(), entry.clone()).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(current) if !current.value().is_expired_at(now) => {
                        let mut entry = current.into_value();
                        entry.last_accessed = at;
                        Op::Put(entry)
                    }
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(current) if current.value().is_expired_at(now) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::Removed(_)))
    }

    async fn purge_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.as_ref().clone())
            .take(limit)
            .collect();

        let mut removed = 0;
        for key in &expired {
            if self.evict_if_expired(key, now).await? {
                removed += 1;
            }
        }
        self.cache.run_pending_tasks().await;
        Ok(removed)
    }
}

impl Debug for MokaDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaDocumentStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::TtlSecs;
    use tessera::domain::Payload;
    use tessera::{CacheService, ServicePolicy, TtlCache};
    use tokio::time::sleep;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_moka_store_save_and_load() {
        let store = MokaDocumentStore::new_unbounded();
        let entry = CacheEntry::new(payload(json!({"hello": "world"})), TtlSecs(60), now_utc()).unwrap();

        store.save("hello", &entry).await.unwrap();
        assert_eq!(store.load("hello").await.unwrap(), Some(entry.clone()));
        assert_eq!(store.load_timestamps("hello").await.unwrap(), Some(entry.timestamps()));
    }

    #[tokio::test]
    async fn test_moka_store_remove() {
        let store = MokaDocumentStore::new_unbounded();
        let entry = CacheEntry::new(payload(json!({})), TtlSecs(60), now_utc()).unwrap();

        store.save("test_key", &entry).await.unwrap();
        assert!(store.remove("test_key").await.unwrap());
        assert!(!store.remove("test_key").await.unwrap());
        assert!(store.load("test_key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_moka_store_touch() {
        let store = MokaDocumentStore::new_unbounded();
        let created = now_utc() - chrono::Duration::minutes(1);
        store
            .save("k", &CacheEntry::new(payload(json!({"a": 1})), TtlSecs(3600), created).unwrap())
            .await
            .unwrap();

        let now = now_utc();
        assert!(store.touch("k", now, now).await.unwrap());
        assert_eq!(store.load("k").await.unwrap().unwrap().last_accessed, now);
        assert!(!store.touch("absent", now, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_reports_metadata_until_purged() {
        let cache = TtlCache::new(MokaDocumentStore::new_unbounded(), ServicePolicy::default());
        let created = now_utc() - chrono::Duration::hours(2);
        cache
            .store()
            .save("old", &CacheEntry::new(payload(json!({"a": 1})), TtlSecs(3600), created).unwrap())
            .await
            .unwrap();

        let metadata = cache.get_metadata("old").await.unwrap();
        assert!(metadata.is_expired);
        assert_eq!(metadata.remaining_ttl_secs(now_utc()), 0);

        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert!(cache.get_metadata("old").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_read_evicts_from_memory() {
        let cache = TtlCache::new(MokaDocumentStore::new_unbounded(), ServicePolicy::default());

        cache.set("short", payload(json!({"a": 1})), Some(TtlSecs(1))).await.unwrap();
        assert!(cache.exists("short").await);

        sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("short").await, None);
        assert!(cache.store().load("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_over_memory_backend() {
        let cache = TtlCache::new(MokaDocumentStore::new_unbounded(), ServicePolicy::default());

        cache.set("key", payload(json!({"v": 1})), Some(TtlSecs(60))).await.unwrap();
        cache.set("key", payload(json!({"v": 2})), Some(TtlSecs(120))).await.unwrap();

        assert_eq!(cache.get("key").await, Some(payload(json!({"v": 2}))));
        let metadata = cache.get_metadata("key").await.unwrap();
        assert_eq!(metadata.expires_at - metadata.created_at, chrono::Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_moka_store_bounded() {
        let store = MokaDocumentStore::new("bounded", Some(2));

        for key in ["key1", "key2", "key3"] {
            let entry = CacheEntry::new(payload(json!({})), TtlSecs(60), now_utc()).unwrap();
            store.save(key, &entry).await.unwrap();
        }
        store.cache.run_pending_tasks().await;

        assert!(store.entry_count() <= 2, "Store should have at most 2 entries");
    }
}
