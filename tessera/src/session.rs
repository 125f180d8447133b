use crate::codec::{self, SessionRecord};
use crate::domain::now_utc;
use crate::ports::CacheService;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use shared::TtlSecs;
use shared::config::SessionConfig;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Session identifier - 32 random bytes, hex encoded
pub type SessionId = String;

const SESSION_ID_BYTES: usize = 32;

/// Generate a cryptographically secure random session identifier
pub fn generate_session_id() -> SessionId {
    use rand::Rng;

    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill(&mut bytes[..]);

    bytes.iter().fold(String::with_capacity(SESSION_ID_BYTES * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Only ids this module could have minted are ever looked up.
pub fn is_valid_session_id(candidate: &str) -> bool {
    candidate.len() == SESSION_ID_BYTES * 2
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A request's view of one user's session
#[derive(Clone, Debug)]
pub struct Session {
    sid: SessionId,
    values: BTreeMap<String, Value>,
    permanent: bool,
    modified: bool,
    new: bool,
}

impl Session {
    /// Empty session under a freshly generated id
    pub fn new() -> Self {
        Self {
            sid: generate_session_id(),
            values: BTreeMap::new(),
            permanent: false,
            modified: false,
            new: true,
        }
    }

    fn loaded(sid: SessionId, record: SessionRecord) -> Self {
        Self {
            sid,
            values: record.values,
            permanent: record.permanent,
            modified: false,
            new: false,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.modified = true;
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.modified = true;
        }
        self.values.clear();
    }

    pub fn set_permanent(&mut self, permanent: bool) {
        if self.permanent != permanent {
            self.modified = true;
        }
        self.permanent = permanent;
    }

    fn to_record(&self) -> SessionRecord {
        SessionRecord {
            permanent: self.permanent,
            values: self.values.clone(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// One `Set-Cookie` directive
#[derive(Clone, Debug, PartialEq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub expires: DateTime<Utc>,
    pub max_age: i64,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: &'static str,
}

impl SessionCookie {
    /// Render as a `Set-Cookie` header value (RFC 6265).
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Expires={}; Max-Age={}",
            self.name,
            self.value,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.max_age
        );
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={}", domain);
        }
        let _ = write!(out, "; Path={}", self.path);
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        let _ = write!(out, "; SameSite={}", self.same_site);
        out
    }
}

/// What the framework must do to the response after a save
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// Nothing was persisted and nothing needs clearing.
    Unchanged,
    SetCookie(SessionCookie),
    ExpireCookie(SessionCookie),
}

/// Pull one cookie's value out of a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Cookie-addressed session persistence over a [`CacheService`]
///
/// The cookie only ever carries the session id. Contents live in the cache
/// under `key_prefix + sid`.
pub struct SessionInterface {
    cache: Arc<dyn CacheService>,
    config: SessionConfig,
}

impl SessionInterface {
    pub fn new(cache: Arc<dyn CacheService>, config: SessionConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache_key(&self, sid: &str) -> String {
        format!("{}{}", self.config.key_prefix, sid)
    }

    pub fn ttl_for(&self, session: &Session) -> TtlSecs {
        if session.permanent {
            self.config.permanent_lifetime
        } else {
            self.config.lifetime
        }
    }

    /// Resolve the request's cookie value to a session.
    ///
    /// Anything short of a well-formed id with a decodable cache entry
    /// yields a brand-new session under a new id.
    pub async fn open_session(&self, cookie: Option<&str>) -> Session {
        let Some(sid) = cookie.filter(|sid| is_valid_session_id(sid)) else {
            if cookie.is_some() {
                debug!("ignoring malformed session cookie");
            }
            return Session::new();
        };

        let key = self.cache_key(sid);
        let Some(payload) = self.cache.get(&key).await else {
            debug!(key = %key, "session not found, issuing a new one");
            return Session::new();
        };

        match codec::decode(&payload) {
            Ok(record) => Session::loaded(sid.to_string(), record),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable session payload, issuing a new one");
                Session::new()
            }
        }
    }

    /// Persist the session and say what the response cookie should become.
    pub async fn save_session(&self, session: &Session) -> SessionOutcome {
        let key = self.cache_key(&session.sid);

        if session.is_empty() {
            if !session.modified {
                return SessionOutcome::Unchanged;
            }
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "failed to delete emptied session");
            }
            return SessionOutcome::ExpireCookie(self.expired_cookie());
        }

        if !self.config.refresh_each_request && !session.new && !session.modified {
            return SessionOutcome::Unchanged;
        }

        let payload = match codec::encode(&session.to_record()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "session serialization failed, change dropped for this request");
                return SessionOutcome::Unchanged;
            }
        };

        let ttl = self.ttl_for(session);
        let lifetime = match ttl.as_time_delta() {
            Ok(lifetime) => lifetime,
            Err(e) => {
                warn!(key = %key, error = %e, "session lifetime out of range, change dropped for this request");
                return SessionOutcome::Unchanged;
            }
        };
        match self.cache.set(&key, payload, Some(ttl)).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, "session write was not persisted"),
            Err(e) => warn!(key = %key, error = %e, "session write failed"),
        }

        SessionOutcome::SetCookie(self.cookie(session.sid.clone(), lifetime))
    }

    fn cookie(&self, value: String, lifetime: TimeDelta) -> SessionCookie {
        SessionCookie {
            name: self.config.cookie_name.clone(),
            value,
            expires: now_utc()
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            max_age: lifetime.num_seconds(),
            domain: self.config.cookie_domain.clone(),
            path: self.config.cookie_path.clone(),
            secure: self.config.cookie_secure,
            http_only: self.config.cookie_http_only,
            same_site: self.config.cookie_same_site.as_str(),
        }
    }

    fn expired_cookie(&self) -> SessionCookie {
        SessionCookie {
            expires: DateTime::<Utc>::UNIX_EPOCH,
            max_age: 0,
            ..self.cookie(String::new(), TimeDelta::zero())
        }
    }
}
