#![deny(clippy::all)]

use crate::domain::{CacheEntry, EntryMetadata, EntryTimestamps, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Result, TtlSecs};

// Ports are the pluggable extension points for underlying storage technologies

/// The cache contract every consumer depends on.
///
/// Reads fail open: a missing, expired or unreadable entry is `None`/`false`,
/// never an error. Writes report `Ok(false)` when the backend failed, or
/// `Err` when the service runs with strict writes. A zero TTL is always
/// `Err(Error::InvalidTtl)`.
#[async_trait]
pub trait CacheService: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<Payload>;

    /// Replace whatever is stored under `key`. `None` uses the service default TTL.
    async fn set(&self, key: &str, payload: Payload, ttl: Option<TtlSecs>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> bool;

    async fn update_access_time(&self, key: &str) -> bool;

    async fn get_metadata(&self, key: &str) -> Option<EntryMetadata>;

    /// Remove up to one batch of expired entries, returning how many went.
    async fn cleanup_expired(&self) -> Result<usize>;

    /// Backend name for logs and diagnostics
    fn backend_name(&self) -> &'static str;
}

/// Port for raw document storage (e.g., Sled, Moka, Redis)
///
/// Implementations report infrastructure failures as `Err` and never apply
/// fail-open policy themselves.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Like `load`, but the payload is never decoded.
    async fn load_timestamps(&self, key: &str) -> Result<Option<EntryTimestamps>>;

    /// Full replace of the document under `key`.
    async fn save(&self, key: &str, entry: &CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<bool>;

    /// Stamp `last_accessed = at` if the record exists and has not expired as of `now`.
    async fn touch(&self, key: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool>;

    /// Remove the record only if it is still expired as of `now`.
    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Remove at most `limit` records expired as of `now`.
    async fn purge_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize>;
}
