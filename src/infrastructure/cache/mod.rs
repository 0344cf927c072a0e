//! Cache infrastructure - store adapters and the cache service

mod factory;
mod in_memory;
mod redis;
mod service;

pub use factory::{CacheConfig, CacheStoreFactory, CacheStoreType};
pub use in_memory::{InMemoryCacheConfig, InMemoryCacheStore};
pub use redis::{RedisCacheConfig, RedisCacheStore};
pub use service::{derive_tag, CacheService, WarmupLoader, COUNTER_TTL, MIN_LOCK_LEASE};
