//! Entity Cache
//!
//! Tag-based cache invalidation and cache-integrated CRUD for multi-tenant
//! entities:
//! - Redis or in-process (moka) cache stores behind one cache service
//! - remember, tags, locks and counters with size-aware TTLs
//! - a generic tenant-scoped entity repository with lifecycle hooks
//! - in-memory or PostgreSQL entity storage

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use crate::config::AppConfig;
pub use domain::DomainError;
pub use infrastructure::cache::CacheService;
pub use infrastructure::entity::{EntityHooks, EntityRepository};

use std::sync::Arc;

use domain::entity::TenantContext;
use infrastructure::cache::{CacheConfig, CacheStoreFactory};
use infrastructure::entity::EntityStoreFactory;
use tracing::info;

/// Create the cache service for the configured store
pub async fn create_cache_service(config: &CacheConfig) -> anyhow::Result<Arc<CacheService>> {
    info!(store = %config.store, prefix = %config.key_prefix, "Creating cache service");

    let store = CacheStoreFactory::new()
        .create(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create cache store: {}", e))?;

    Ok(Arc::new(
        CacheService::new(store).with_prefix(config.key_prefix.clone()),
    ))
}

/// Create a repository for one entity table on the configured storage backend
pub async fn create_repository<H>(
    config: &AppConfig,
    hooks: H,
    table_name: &str,
    cache: Arc<CacheService>,
    tenants: Arc<dyn TenantContext>,
) -> anyhow::Result<EntityRepository<H>>
where
    H: EntityHooks,
{
    info!(entity = H::ENTITY_NAME, table = %table_name, backend = ?config.storage.backend, "Creating repository");

    let store = EntityStoreFactory::create::<H::Attributes>(&config.storage, table_name)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create entity store: {}", e))?;

    Ok(EntityRepository::new(hooks, store, cache, tenants)
        .with_default_ttl(config.cache.entity_ttl()))
}
