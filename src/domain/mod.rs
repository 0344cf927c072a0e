//! Domain layer - cache and entity abstractions

pub mod cache;
pub mod entity;
pub mod error;

pub use cache::{CacheStats, CacheStore, SmartTtl, StatsSnapshot};
pub use entity::{
    EntityId, EntityQuery, EntityStore, ListFilters, NewRecord, Record, Scope, TenantContext,
    TenantId,
};
pub use error::DomainError;
