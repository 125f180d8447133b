use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tessera::{EntryMetadata, Session};

// === Session Models ===

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub new: bool,
    pub permanent: bool,
    pub values: BTreeMap<String, Value>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            new: session.is_new(),
            permanent: session.is_permanent(),
            values: session.values().clone(),
        }
    }
}

#[derive(Deserialize)]
pub struct PermanentRequest {
    pub permanent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

// === Admin Models ===

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryMetadataResponse {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_expired: bool,
    pub remaining_ttl_secs: u64,
}

impl EntryMetadataResponse {
    pub fn new(key: String, metadata: EntryMetadata, now: DateTime<Utc>) -> Self {
        Self {
            key,
            created_at: metadata.created_at,
            expires_at: metadata.expires_at,
            last_accessed: metadata.last_accessed,
            is_expired: metadata.is_expired,
            remaining_ttl_secs: metadata.remaining_ttl_secs(now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
}
