use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo, RedisError};
use shared::config::RedisSettings;
use shared::{Error, Result};
use std::fmt::Debug;
use std::time::Duration;
use tessera::domain::{CacheEntry, EntryTimestamps};
use tessera::ports::DocumentStore;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info};

fn redis_error(e: RedisError) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("redis: {}", e))
    } else {
        Error::Storage(format!("redis: {}", e))
    }
}

/// Redis-backed document store.
///
/// Each entry is one JSON string under `{collection}:{key}` with a native
/// PX expiry, so Redis itself is the sweeper. Calls share one multiplexed
/// [`ConnectionManager`], opened on first use; it reconnects on its own
/// after a dropped connection.
pub struct RedisDocumentStore {
    client: Client,
    address: String,
    db: u32,
    namespace: String,
    op_timeout: Duration,
    connection: OnceCell<ConnectionManager>,
}

impl RedisDocumentStore {
    pub fn new(settings: &RedisSettings, collection: &str, op_timeout: Duration) -> Result<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: RedisConnectionInfo {
                db: i64::from(settings.db),
                username: settings.username.clone(),
                password: settings.password.clone(),
                ..Default::default()
            },
        };
        let client = Client::open(info).map_err(redis_error)?;

        info!(
            "Redis document store configured for {} (db {}, collection '{}')",
            settings.address(),
            settings.db,
            collection
        );
        Ok(Self {
            client,
            address: settings.address(),
            db: settings.db,
            namespace: format!("{}:", collection),
            op_timeout,
            connection: OnceCell::new(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .get_or_try_init(|| async {
                debug!("Opening redis connection to {}", self.address);
                ConnectionManager::new(self.client.clone()).await.map_err(redis_error)
            })
            .await
            .cloned()
    }

    /// Run one command, connecting first if needed, within `op_timeout`.
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let outcome = timeout(self.op_timeout, async {
            let mut connection = self.connection().await?;
            let reply: T = cmd.query_async(&mut connection).await.map_err(redis_error)?;
            Ok::<T, Error>(reply)
        })
        .await;

        outcome.unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "redis did not answer within {:?}",
                self.op_timeout
            )))
        })
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.namespaced(key));
        self.query(&cmd).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.namespaced(key));
        let removed: i64 = self.query(&cmd).await?;
        Ok(removed > 0)
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.get_raw(key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn load_timestamps(&self, key: &str) -> Result<Option<EntryTimestamps>> {
        match self.get_raw(key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let doc = serde_json::to_vec(entry).map_err(|e| Error::Serialization(e.to_string()))?;
        // PX must be positive; an already-expired entry lives for a millisecond
        let ttl_ms = (entry.expires_at - Utc::now()).num_milliseconds().max(1);

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(doc).arg("PX").arg(ttl_ms);
        self.query::<()>(&cmd).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.del(key).await
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut entry) = self.load(key).await? else {
            return Ok(false);
        };
        if entry.is_expired_at(now) {
            return Ok(false);
        }
        entry.last_accessed = at;
        let doc = serde_json::to_vec(&entry).map_err(|e| Error::Serialization(e.to_string()))?;

        // XX: never resurrect a key that vanished in between; KEEPTTL: expiry is unchanged
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(doc).arg("XX").arg("KEEPTTL");
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn evict_if_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        // GET then DEL is not atomic; a set landing in between can be lost.
        // Redis normally expires the key itself before this path is reached.
        match self.load_timestamps(key).await? {
            Some(timestamps) if timestamps.is_expired_at(now) => self.del(key).await,
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, _now: DateTime<Utc>, _limit: usize) -> Result<usize> {
        Ok(0)
    }
}

impl Debug for RedisDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDocumentStore")
            .field("address", &self.address)
            .field("db", &self.db)
            .field("namespace", &self.namespace)
            .field("op_timeout", &self.op_timeout)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::TtlSecs;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tessera::domain::{Payload, now_utc};
    use tessera::{CacheService, ServicePolicy, TtlCache};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn settings(port: u16) -> RedisSettings {
        RedisSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            db: 0,
        }
    }

    /// Reads `<marker><n>\r\n` at `pos`, or None until the line is complete.
    fn read_header(buffer: &[u8], pos: &mut usize, marker: u8) -> Option<usize> {
        let rest = &buffer[*pos..];
        let line_end = rest.windows(2).position(|w| w == b"\r\n")?;
        assert_eq!(rest[0], marker, "unexpected frame from client");
        let n = std::str::from_utf8(&rest[1..line_end]).ok()?.parse().ok()?;
        *pos += line_end + 2;
        Some(n)
    }

    /// Splits one complete command array off the front of `buffer`.
    fn take_command(buffer: &mut Vec<u8>) -> Option<Vec<Vec<u8>>> {
        let mut pos = 0;
        let count = read_header(buffer, &mut pos, b'*')?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_header(buffer, &mut pos, b'$')?;
            if buffer.len() < pos + len + 2 {
                return None;
            }
            args.push(buffer[pos..pos + len].to_vec());
            pos += len + 2;
        }
        buffer.drain(..pos);
        Some(args)
    }

    fn bulk(value: &[u8]) -> Vec<u8> {
        let mut out = format!("${}\r\n", value.len()).into_bytes();
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Minimal in-process server speaking the handful of commands the store issues.
    /// Expiry is not simulated; commands are recorded for inspection.
    async fn fake_redis() -> (RedisSettings, Arc<parking_lot::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = log.clone();

        tokio::spawn(async move {
            let data: Arc<parking_lot::Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Default::default();
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let data = data.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        while let Some(args) = take_command(&mut buffer) {
                            let name = String::from_utf8_lossy(&args[0]).to_uppercase();
                            seen.lock().push(name.clone());

                            let reply = match name.as_str() {
                                "AUTH" | "SELECT" | "CLIENT" => b"+OK\r\n".to_vec(),
                                "GET" => match data.lock().get(&args[1]) {
                                    Some(v) => bulk(v),
                                    None => b"$-1\r\n".to_vec(),
                                },
                                "SET" => {
                                    let xx = args.iter().any(|a| a.as_slice() == b"XX");
                                    let mut map = data.lock();
                                    if xx && !map.contains_key(&args[1]) {
                                        b"$-1\r\n".to_vec()
                                    } else {
                                        map.insert(args[1].clone(), args[2].clone());
                                        b"+OK\r\n".to_vec()
                                    }
                                }
                                "DEL" => {
                                    let removed = data.lock().remove(&args[1]).map_or(0, |_| 1);
                                    format!(":{}\r\n", removed).into_bytes()
                                }
                                _ => b"-ERR unknown command\r\n".to_vec(),
                            };

                            if socket.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                        }
                    }
                });
            }
        });

        (settings(port), log)
    }

    fn data_commands(log: &parking_lot::Mutex<Vec<String>>) -> Vec<String> {
        log.lock().iter().filter(|c| *c != "CLIENT").cloned().collect()
    }

    #[tokio::test]
    async fn test_redis_store_round_trip() {
        let (settings, _) = fake_redis().await;
        let store = RedisDocumentStore::new(&settings, "cache_sessions", Duration::from_secs(2)).unwrap();
        let entry = CacheEntry::new(payload(json!({"user": "ada"})), TtlSecs(60), now_utc()).unwrap();

        store.save("k", &entry).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(entry.clone()));
        assert_eq!(store.load_timestamps("k").await.unwrap(), Some(entry.timestamps()));

        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
        assert!(store.load("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_touch_only_existing_live_keys() {
        let (settings, _) = fake_redis().await;
        let store = RedisDocumentStore::new(&settings, "c", Duration::from_secs(2)).unwrap();
        let created = now_utc() - chrono::Duration::minutes(5);
        store
            .save("live", &CacheEntry::new(payload(json!({})), TtlSecs(3600), created).unwrap())
            .await
            .unwrap();
        store
            .save("stale", &CacheEntry::new(payload(json!({})), TtlSecs(1), created).unwrap())
            .await
            .unwrap();

        let now = now_utc();
        assert!(store.touch("live", now, now).await.unwrap());
        assert_eq!(store.load("live").await.unwrap().unwrap().last_accessed, now);
        assert!(!store.touch("stale", now, now).await.unwrap());
        assert!(!store.touch("missing", now, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_redis_lazy_eviction_through_service() {
        let (settings, log) = fake_redis().await;
        let store = RedisDocumentStore::new(&settings, "c", Duration::from_secs(2)).unwrap();
        let created = now_utc() - chrono::Duration::minutes(5);
        store
            .save("old", &CacheEntry::new(payload(json!({"a": 1})), TtlSecs(1), created).unwrap())
            .await
            .unwrap();

        let cache = TtlCache::new(store, ServicePolicy::default());
        assert_eq!(cache.get("old").await, None);
        assert!(cache.store().load("old").await.unwrap().is_none());
        assert!(log.lock().iter().any(|c| c == "DEL"));
        assert_eq!(cache.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redis_auth_and_select_on_connect() {
        let (mut settings, log) = fake_redis().await;
        settings.password = Some("secret".to_string());
        settings.db = 3;
        let store = RedisDocumentStore::new(&settings, "c", Duration::from_secs(2)).unwrap();

        assert!(store.load("any").await.unwrap().is_none());
        assert_eq!(data_commands(&log), vec!["AUTH", "SELECT", "GET"]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_connection() {
        let (settings, log) = fake_redis().await;
        let store = RedisDocumentStore::new(&settings, "c", Duration::from_secs(2)).unwrap();
        let entry = CacheEntry::new(payload(json!({"n": 1})), TtlSecs(60), now_utc()).unwrap();
        store.save("a", &entry).await.unwrap();
        store.save("b", &entry).await.unwrap();

        let (a, b, missing) = tokio::join!(store.load("a"), store.load("b"), store.load("c"));
        assert_eq!(a.unwrap(), Some(entry.clone()));
        assert_eq!(b.unwrap(), Some(entry));
        assert!(missing.unwrap().is_none());
        assert_eq!(data_commands(&log).iter().filter(|c| *c == "GET").count(), 3);
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out_and_fails_open() {
        // accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = RedisDocumentStore::new(&settings(port), "c", Duration::from_millis(100)).unwrap();
        assert!(matches!(store.load("k").await, Err(Error::Timeout(_))));

        let cache = TtlCache::new(store, ServicePolicy::default());
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.set("k", payload(json!({"a": 1})), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_infrastructure_error() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let store = RedisDocumentStore::new(&settings(port), "c", Duration::from_millis(500)).unwrap();
        let err = store.load("k").await.unwrap_err();
        assert!(err.is_infrastructure(), "unexpected error {:?}", err);
    }
}
