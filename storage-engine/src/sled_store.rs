use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{Error, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{IVec, Tree};
use std::path::Path;
use tessera::domain::{CacheEntry, EntryTimestamps};
use tessera::ports::DocumentStore;
use tracing::debug;

const INDEX_SUFFIX: &str = "__expires_at";
const EXPIRY_PREFIX_LEN: usize = 8;

/// Sled-based document store.
///
/// One tree per collection holds the JSON documents. A second tree indexes
/// them by `expires_at` (big-endian millis followed by the key) so expired
/// documents can be found without a full scan.
#[derive(Clone)]
pub struct SledDocumentStore {
    db: sled::Db,
    documents: Tree,
    expiry_index: Tree,
}

/// Only the field the index is keyed on.
#[derive(Deserialize)]
struct StoredExpiry {
    #[serde(deserialize_with = "tessera::domain::timestamp::deserialize")]
    expires_at: DateTime<Utc>,
}

fn stored_expiry(raw: &[u8]) -> Option<DateTime<Utc>> {
    serde_json::from_slice::<StoredExpiry>(raw)
        .ok()
        .map(|s| s.expires_at)
}

fn index_key(expires_at: DateTime<Utc>, key: &[u8]) -> Vec<u8> {
    let millis = expires_at.timestamp_millis().max(0) as u64;
    let mut out = Vec::with_capacity(EXPIRY_PREFIX_LEN + key.len());
    out.extend_from_slice(&millis.to_be_bytes());
    out.extend_from_slice(key);
    out
}

fn storage_error(context: &'static str) -> impl Fn(sled::Error) -> Error {
    move |e| Error::Storage(format!("{}: {}", context, e))
}

fn transaction_error(context: &'static str) -> impl Fn(TransactionError<Error>) -> Error {
    move |e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(format!("{}: {}", context, e)),
    }
}

type TxResult<T> = sled::transaction::ConflictableTransactionResult<T, Error>;

fn abort_serialization(e: serde_json::Error) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(Error::Serialization(e.to_string()))
}

impl SledDocumentStore {
    /// Open (or create) the store under `path`, using `collection` as the tree name.
    /// Creates the directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;

        let db = sled::open(path).map_err(storage_error("Failed to open Sled database"))?;
        Self::with_db(db, collection)
    }

    /// Use an already opened database
    pub fn with_db(db: sled::Db, collection: &str) -> Result<Self> {
        let documents = db
            .open_tree(collection)
            .map_err(storage_error("Failed to open collection"))?;
        let expiry_index = db
            .open_tree(format!("{}{}", collection, INDEX_SUFFIX))
            .map_err(storage_error("Failed to open expiry index"))?;

        Ok(Self {
            db,
            documents,
            expiry_index,
        })
    }

    /// Number of documents, expired ones included
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(storage_error("Failed to flush database"))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    fn name(&self) -> &'static str {
        "document-store"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw = self
            .documents
            .get(key.as_bytes())
            .map_err(storage_error("Failed to get document"))?;

        match raw {
            Some(bytes) => {
                let entry = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Serialization(format!("Failed to deserialize document: {}", e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn load_timestamps(&self, key: &str) -> Result<Option<EntryTimestamps>> {
        let raw = self
            .documents
            .get(key.as_bytes())
            .map_err(storage_error("Failed to get document"))?;

        raw.map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|e| {
                Error::Serialization(format!("Failed to deserialize document metadata: {}", e))
            })
        })
        .transpose()
    }

    async fn save(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let doc = serde_json::to_vec(entry)
            .map_err(|e| Error::Serialization(format!("Failed to serialize document: {}", e)))?;
        let key = key.as_bytes();
        let new_index_key = index_key(entry.expires_at, key);

        (&self.documents, &self.expiry_index)
            .transaction(|(docs, index)| -> TxResult<()> {
                if let Some(previous) = docs.insert(key, doc.as_slice())? {
                    if let Some(old) = stored_expiry(&previous) {
                        index.remove(index_key(old, key))?;
                    }
                }
                index.insert(new_index_key.as_slice(), Vec::<u8>::new())?;
                Ok(())
            })
            .map_err(transaction_error("Failed to save document"))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let key = key.as_bytes();

        (&self.documents, &self.expiry_index)
            .transaction(|(docs, index)| -> TxResult<bool> {
                match docs.remove(key)? {
                    Some(previous) => {
                        if let Some(old) = stored_expiry(&previous) {
                            index.remove(index_key(old, key))?;
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .map_err(transaction_error("Failed to delete document"))
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let key = key.as_bytes();

        self.documents
            .transaction(|docs| -> TxResult<bool> {
                let Some(raw) = docs.get(key)? else {
                    return Ok(false);
                };
                let mut entry: CacheEntry = serde_json::from_slice(&raw).map_err(abort_serialization)?;
                if entry.is_expired_at(now) {
                    return Ok(false);
                }
                entry.last_accessed = at;
                let doc = serde_json::to_vec(&entry).map_err(abort_serialization)?;
                docs.insert(key, doc)?;
                Ok(true)
            })
            .map_err(transaction_error("Failed to update access time"))
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let key = key.as_bytes();

        (&self.documents, &self.expiry_index)
            .transaction(|(docs, index)| -> TxResult<bool> {
                let Some(raw) = docs.get(key)? else {
                    return Ok(false);
                };
                match stored_expiry(&raw) {
                    Some(expires_at) if expires_at < now => {
                        docs.remove(key)?;
                        index.remove(index_key(expires_at, key))?;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })
            .map_err(transaction_error("Failed to evict document"))
    }

    async fn purge_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let upper = (now.timestamp_millis().max(0) as u64).to_be_bytes();
        let candidates = self
            .expiry_index
            .range(..&upper[..])
            .keys()
            .take(limit)
            .collect::<std::result::Result<Vec<IVec>, _>>()
            .map_err(storage_error("Failed to scan expiry index"))?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let removed = (&self.documents, &self.expiry_index)
            .transaction(|(docs, index)| -> TxResult<usize> {
                let mut removed = 0usize;
                for index_entry in &candidates {
                    index.remove(index_entry.clone())?;
                    let key = &index_entry[EXPIRY_PREFIX_LEN..];
                    if let Some(raw) = docs.get(key)? {
                        if stored_expiry(&raw).is_some_and(|expires_at| expires_at < now) {
                            docs.remove(key)?;
                            removed += 1;
                        }
                    }
                }
                Ok(removed)
            })
            .map_err(transaction_error("Failed to purge expired documents"))?;

        debug!(scanned = candidates.len(), removed, "purged expired documents");
        Ok(removed)
    }
}

impl std::fmt::Debug for SledDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDocumentStore")
            .field("documents", &self.documents.len())
            .field("indexed", &self.expiry_index.len())
            .finish()
    }
}
