use crate::{Error, Result, TtlSecs};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Which storage technology backs the cache service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    DocumentStore,
    Memory,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DocumentStore => "document-store",
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document-store" | "document_store" | "firestore" => Ok(BackendKind::DocumentStore),
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(Error::Config(format!(
                "unknown cache backend '{}'. Must be 'document-store', 'memory', or 'redis'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lax" => Ok(SameSite::Lax),
            "strict" => Ok(SameSite::Strict),
            "none" => Ok(SameSite::None),
            other => Err(Error::Config(format!(
                "invalid SameSite value '{}'. Must be 'Lax', 'Strict', or 'None'",
                other
            ))),
        }
    }
}

/// Connection parameters for the network backend.
#[derive(Clone, Debug)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: u32,
}

impl RedisSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub collection_name: String,
    pub data_dir: String,
    pub default_ttl: TtlSecs,
    pub cleanup_batch_size: usize,
    pub sweep_interval: Option<Duration>, // None = sweeper disabled
    pub strict_writes: bool,
    pub memory_max_entries: Option<u64>,
    pub operation_timeout: Duration,
    pub redis: Option<RedisSettings>,
}

impl CacheConfig {
    const DEFAULT_COLLECTION_NAME: &str = "cache_sessions";
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_CLEANUP_BATCH_SIZE: usize = 500;
    const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
    const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 2000;
    const DEFAULT_REDIS_PORT: u16 = 6379;

    /// Defaults for the given backend, ignoring the environment entirely.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            collection_name: Self::DEFAULT_COLLECTION_NAME.to_string(),
            data_dir: Self::DEFAULT_DATA_DIR.to_string(),
            default_ttl: TtlSecs::DEFAULT,
            cleanup_batch_size: Self::DEFAULT_CLEANUP_BATCH_SIZE,
            sweep_interval: Some(Duration::from_secs(Self::DEFAULT_SWEEP_INTERVAL_SECS)),
            strict_writes: false,
            memory_max_entries: None,
            operation_timeout: Duration::from_millis(Self::DEFAULT_OPERATION_TIMEOUT_MS),
            redis: None,
        }
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup("CACHE_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendKind::DocumentStore,
        };

        let default_ttl = TtlSecs(parse_or(lookup, "CACHE_DEFAULT_TTL_SECS", TtlSecs::DEFAULT.0)?)
            .validate()
            .map_err(|e| Error::Config(format!("CACHE_DEFAULT_TTL_SECS: {}", e)))?;

        let cleanup_batch_size =
            parse_or(lookup, "CACHE_CLEANUP_BATCH_SIZE", Self::DEFAULT_CLEANUP_BATCH_SIZE)?;
        if cleanup_batch_size == 0 {
            return Err(Error::Config(
                "CACHE_CLEANUP_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }

        let operation_timeout_ms = parse_or(
            lookup,
            "CACHE_OPERATION_TIMEOUT_MS",
            Self::DEFAULT_OPERATION_TIMEOUT_MS,
        )?;
        if operation_timeout_ms == 0 {
            return Err(Error::Config(
                "CACHE_OPERATION_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let sweep_secs = parse_or(
            lookup,
            "CACHE_SWEEP_INTERVAL_SECS",
            Self::DEFAULT_SWEEP_INTERVAL_SECS,
        )?;

        let redis = match backend {
            BackendKind::Redis => {
                let host = lookup("CACHE_REDIS_HOST").ok_or_else(|| {
                    Error::Config("CACHE_REDIS_HOST is required for the redis backend".to_string())
                })?;
                Some(RedisSettings {
                    host,
                    port: parse_or(lookup, "CACHE_REDIS_PORT", Self::DEFAULT_REDIS_PORT)?,
                    username: lookup("CACHE_REDIS_USERNAME"),
                    password: lookup("CACHE_REDIS_PASSWORD"),
                    db: parse_or(lookup, "CACHE_REDIS_DB", 0)?,
                })
            }
            _ => None,
        };

        Ok(Self {
            backend,
            collection_name: lookup("CACHE_COLLECTION_NAME")
                .unwrap_or_else(|| Self::DEFAULT_COLLECTION_NAME.to_string()),
            data_dir: lookup("CACHE_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            default_ttl,
            cleanup_batch_size,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            strict_writes: parse_bool_or(lookup, "CACHE_STRICT_WRITES", false)?,
            memory_max_entries: lookup("CACHE_MEMORY_MAX_ENTRIES")
                .map(|v| parse_value("CACHE_MEMORY_MAX_ENTRIES", &v))
                .transpose()?,
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            redis,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_path: String,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub cookie_same_site: SameSite,
    pub key_prefix: String,
    pub permanent_lifetime: TtlSecs,
    pub lifetime: TtlSecs,
    pub refresh_each_request: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            cookie_domain: None,
            cookie_path: "/".to_string(),
            cookie_secure: false,
            cookie_http_only: true,
            cookie_same_site: SameSite::Lax,
            key_prefix: "session:".to_string(),
            permanent_lifetime: TtlSecs::DEFAULT,
            lifetime: TtlSecs(24 * 60 * 60),
            refresh_each_request: true,
        }
    }
}

impl SessionConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let permanent_lifetime = TtlSecs(parse_or(
            lookup,
            "PERMANENT_SESSION_LIFETIME_SECS",
            defaults.permanent_lifetime.0,
        )?)
        .validate()
        .map_err(|e| Error::Config(format!("PERMANENT_SESSION_LIFETIME_SECS: {}", e)))?;
        let lifetime = TtlSecs(parse_or(lookup, "SESSION_LIFETIME_SECS", defaults.lifetime.0)?)
            .validate()
            .map_err(|e| Error::Config(format!("SESSION_LIFETIME_SECS: {}", e)))?;

        let cookie_secure = parse_bool_or(lookup, "SESSION_COOKIE_SECURE", defaults.cookie_secure)?;
        let cookie_same_site = match lookup("SESSION_COOKIE_SAMESITE") {
            Some(value) => value.parse()?,
            None => defaults.cookie_same_site,
        };
        if cookie_same_site == SameSite::None && !cookie_secure {
            warn!("SESSION_COOKIE_SAMESITE=None without SESSION_COOKIE_SECURE; browsers will reject the cookie");
        }

        Ok(Self {
            cookie_name: lookup("SESSION_COOKIE_NAME").unwrap_or(defaults.cookie_name),
            cookie_domain: lookup("SESSION_COOKIE_DOMAIN").filter(|d| !d.is_empty()),
            cookie_path: lookup("SESSION_COOKIE_PATH").unwrap_or(defaults.cookie_path),
            cookie_secure,
            cookie_http_only: parse_bool_or(
                lookup,
                "SESSION_COOKIE_HTTPONLY",
                defaults.cookie_http_only,
            )?,
            cookie_same_site,
            key_prefix: lookup("SESSION_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            permanent_lifetime,
            lifetime,
            refresh_each_request: parse_bool_or(
                lookup,
                "SESSION_REFRESH_EACH_REQUEST",
                defaults.refresh_each_request,
            )?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

/// Process configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

impl Config {
    const DEFAULT_HOST: &str = "0.0.0.0";
    const DEFAULT_HTTP_PORT: u16 = 8080;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            cache: CacheConfig::from_lookup(&lookup)?,
            session: SessionConfig::from_lookup(&lookup)?,
            server: ServerConfig {
                host: lookup("TESSERA_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
                http_port: parse_or(&lookup, "TESSERA_HTTP_PORT", Self::DEFAULT_HTTP_PORT)?,
            },
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{}: cannot parse '{}'", key, raw)))
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("{}: expected a boolean, got '{}'", key, raw))),
        },
        None => Ok(default),
    }
}
