//! Entity infrastructure - store backends and the cached repository

mod factory;
mod in_memory;
mod postgres;
mod repository;

pub use factory::{EntityStoreFactory, StorageConfig, StorageType};
pub use in_memory::InMemoryEntityStore;
pub use postgres::{PostgresConfig, PostgresEntityStore};
pub use repository::{EntityHooks, EntityRepository, DEFAULT_ENTITY_TTL};
