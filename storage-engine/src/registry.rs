use crate::CacheServiceFactory;
use parking_lot::RwLock;
use shared::Result;
use shared::config::CacheConfig;
use std::sync::Arc;
use tessera::CacheService;

/// Process-wide holder of the one cache service instance.
///
/// Built once at startup and passed to consumers; it carries no business
/// state, only the shared backend client.
pub struct CacheServiceRegistry {
    config: CacheConfig,
    service: RwLock<Option<Arc<dyn CacheService>>>,
}

impl CacheServiceRegistry {
    /// Construct the configured backend now, so misconfiguration fails at startup.
    pub fn initialize(config: CacheConfig) -> Result<Self> {
        let service = CacheServiceFactory::create(&config)?;
        Ok(Self {
            config,
            service: RwLock::new(Some(service)),
        })
    }

    /// The shared instance. Rebuilt only after a `reset`.
    pub fn cache_service(&self) -> Result<Arc<dyn CacheService>> {
        if let Some(service) = self.service.read().as_ref() {
            return Ok(service.clone());
        }

        let mut slot = self.service.write();
        if let Some(service) = slot.as_ref() {
            return Ok(service.clone());
        }
        let service = CacheServiceFactory::create(&self.config)?;
        *slot = Some(service.clone());
        Ok(service)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Drop the held instance. Test setup/teardown only.
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&self) {
        self.service.write().take();
    }
}

impl std::fmt::Debug for CacheServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheServiceRegistry")
            .field("backend", &self.config.backend)
            .field("initialized", &self.service.read().is_some())
            .finish()
    }
}
