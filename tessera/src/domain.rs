use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use shared::{Error, Result, TtlSecs};

/// Opaque caller payload. The store never looks inside it.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Current time, truncated to the microsecond precision documents are stored with.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Stored form of one cached item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Payload,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    /// A fresh entry: created and accessed now, expiring `ttl` from now.
    pub fn new(data: Payload, ttl: TtlSecs, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = now
            .checked_add_signed(ttl.as_time_delta()?)
            .ok_or(Error::InvalidTtl(ttl.0))?;
        Ok(Self {
            data,
            created_at: now,
            expires_at,
            last_accessed: now,
        })
    }

    pub fn timestamps(&self) -> EntryTimestamps {
        EntryTimestamps {
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: self.last_accessed,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// The three timestamps of an entry, decoded without touching `data`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct EntryTimestamps {
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_accessed: DateTime<Utc>,
}

impl EntryTimestamps {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn metadata_at(&self, now: DateTime<Utc>) -> EntryMetadata {
        EntryMetadata {
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: self.last_accessed,
            is_expired: self.is_expired_at(now),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_expired: bool,
}

impl EntryMetadata {
    /// Seconds left before expiry, zero once expired.
    pub fn remaining_ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// Storage-boundary timestamp format.
///
/// Written as RFC 3339 in UTC. Older writers stored naive timestamps without
/// an offset; those are read as UTC here so nothing past this point ever
/// branches on timestamp shape.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("unrecognised timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
            return Some(aware.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }
}
