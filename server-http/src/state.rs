use shared::config::SessionConfig;
use std::sync::Arc;
use tessera::{CacheService, SessionInterface};

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionInterface>,
    pub cache: Arc<dyn CacheService>,
}

impl AppState {
    pub fn new(cache: Arc<dyn CacheService>, session_config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(SessionInterface::new(cache.clone(), session_config)),
            cache,
        }
    }
}
