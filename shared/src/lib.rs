// shared/src/lib.rs

/// Failures a cache operation can report.
///
/// A miss is never an error: absent or expired keys are `None`/`false` at the
/// service layer. These variants cover infrastructure, programmer and
/// configuration failures only.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("invalid ttl: {0}s (must be between 1 and {max}s)", max = TtlSecs::MAX.0)]
    InvalidTtl(u64),
    #[error("configuration: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Infrastructure failures are the ones a cache is allowed to swallow.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Serialization(_) | Error::Timeout(_) | Error::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live in whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlSecs(pub u64);

impl TtlSecs {
    /// 30 days, the long "remember me" default.
    pub const DEFAULT: TtlSecs = TtlSecs(30 * 24 * 60 * 60);

    /// 100 years. Anything longer cannot be added to a timestamp safely.
    pub const MAX: TtlSecs = TtlSecs(100 * 365 * 24 * 60 * 60);

    pub fn validate(self) -> Result<Self> {
        if self.0 == 0 || self.0 > Self::MAX.0 {
            return Err(Error::InvalidTtl(self.0));
        }
        Ok(self)
    }

    /// Checked conversion for timestamp arithmetic.
    pub fn as_time_delta(&self) -> Result<chrono::TimeDelta> {
        let secs = self.validate()?.0;
        i64::try_from(secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .ok_or(Error::InvalidTtl(secs))
    }
}

pub mod config;
