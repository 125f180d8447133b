pub mod codec;
pub mod domain;
pub mod ports;
pub mod service;
pub mod session;

#[cfg(test)]
mod testing;

pub use domain::{CacheEntry, EntryMetadata, EntryTimestamps, Payload};
pub use ports::{CacheService, DocumentStore};
pub use service::{ServicePolicy, TtlCache};
pub use session::{Session, SessionCookie, SessionInterface, SessionOutcome};
