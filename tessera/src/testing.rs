//! In-memory document store double with failure switches.

use crate::domain::{CacheEntry, EntryTimestamps, Payload};
use crate::ports::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MapStore {
    docs: Mutex<HashMap<String, CacheEntry>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_touch: AtomicBool,
}

impl MapStore {
    pub fn raw(&self, key: &str) -> Option<CacheEntry> {
        self.docs.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, entry: CacheEntry) {
        self.docs.lock().insert(key.to_string(), entry);
    }

    pub fn keys(&self) -> Vec<String> {
        self.docs.lock().keys().cloned().collect()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("{} unavailable", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MapStore {
    fn name(&self) -> &'static str {
        "map"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        Self::check(&self.fail_reads, "read")?;
        Ok(self.raw(key))
    }

    async fn load_timestamps(&self, key: &str) -> Result<Option<EntryTimestamps>> {
        Self::check(&self.fail_reads, "read")?;
        Ok(self.raw(key).map(|e| e.timestamps()))
    }

    async fn save(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        Self::check(&self.fail_writes, "write")?;
        self.insert_raw(key, entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Self::check(&self.fail_writes, "write")?;
        Ok(self.docs.lock().remove(key).is_some())
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        Self::check(&self.fail_touch, "touch")?;
        let mut docs = self.docs.lock();
        match docs.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.last_accessed = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Self::check(&self.fail_writes, "write")?;
        let mut docs = self.docs.lock();
        if docs.get(key).is_some_and(|e| e.is_expired_at(now)) {
            docs.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        Self::check(&self.fail_writes, "write")?;
        let mut docs = self.docs.lock();
        let expired: Vec<String> = docs
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect();
        for key in &expired {
            docs.remove(key);
        }
        Ok(expired.len())
    }
}

pub fn payload(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}
