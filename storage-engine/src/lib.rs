pub mod moka_cache;
pub mod redis_store;
pub mod registry;
pub mod sled_store;
pub mod sweeper;

pub use moka_cache::MokaDocumentStore;
pub use redis_store::RedisDocumentStore;
pub use registry::CacheServiceRegistry;
pub use sled_store::SledDocumentStore;
pub use sweeper::spawn_sweeper;

use shared::config::{BackendKind, CacheConfig};
use shared::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tessera::{CacheService, ServicePolicy, TtlCache};
use tracing::info;

/// Builds the configured cache service.
/// The only place that names concrete backends.
pub struct CacheServiceFactory;

impl CacheServiceFactory {
    pub fn create(config: &CacheConfig) -> Result<Arc<dyn CacheService>> {
        let policy = ServicePolicy::from(config);

        let service: Arc<dyn CacheService> = match config.backend {
            BackendKind::DocumentStore => {
                let path = Path::new(&config.data_dir).join(&config.collection_name);
                let store = SledDocumentStore::open(&path, &config.collection_name)?;
                info!("Document store opened at {}", path.display());
                Arc::new(TtlCache::new(store, policy))
            }
            BackendKind::Memory => {
                let store = MokaDocumentStore::new(&config.collection_name, config.memory_max_entries);
                Arc::new(TtlCache::new(store, policy))
            }
            BackendKind::Redis => {
                let settings = config.redis.clone().ok_or_else(|| {
                    Error::Config("redis backend selected without redis settings".to_string())
                })?;
                let store = RedisDocumentStore::new(&settings, &config.collection_name, config.operation_timeout)?;
                Arc::new(TtlCache::new(store, policy))
            }
        };

        info!(
            "Cache service ready: backend={}, collection={}, default_ttl={}s, strict_writes={}",
            service.backend_name(),
            config.collection_name,
            config.default_ttl.0,
            config.strict_writes
        );
        Ok(service)
    }
}
