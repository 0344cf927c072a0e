//! Cache store factory for runtime selection

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

use super::in_memory::{InMemoryCacheConfig, InMemoryCacheStore};
use super::redis::{RedisCacheConfig, RedisCacheStore};

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStoreType {
    /// In-process store using moka
    #[default]
    InMemory,
    /// Redis store
    Redis,
}

impl fmt::Display for CacheStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStoreType::InMemory => write!(f, "in_memory"),
            CacheStoreType::Redis => write!(f, "redis"),
        }
    }
}

impl FromStr for CacheStoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(CacheStoreType::InMemory),
            "redis" => Ok(CacheStoreType::Redis),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache store: {}. Valid stores: in_memory, redis",
                s
            ))),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend to create
    pub store: CacheStoreType,
    /// Redis URL (required for the Redis store)
    pub redis_url: Option<String>,
    /// Prefix applied to every key the service writes
    pub key_prefix: String,
    /// TTL used by entity repositories that do not override it, in seconds
    pub entity_ttl_secs: u64,
    /// Byte budget of the in-memory store
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store: CacheStoreType::InMemory,
            redis_url: None,
            key_prefix: String::new(),
            entity_ttl_secs: 1800,
            max_capacity: InMemoryCacheConfig::default().max_capacity,
        }
    }
}

impl CacheConfig {
    /// In-memory configuration
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Redis configuration
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            store: CacheStoreType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the in-memory byte budget
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    /// Sets the default entity TTL
    pub fn with_entity_ttl(mut self, ttl: Duration) -> Self {
        self.entity_ttl_secs = ttl.as_secs();
        self
    }

    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    /// Creates config from environment variables
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates config from a variable lookup, defaulting what is unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = lookup("CACHE_STORE")
            .unwrap_or_else(|| "in_memory".to_string())
            .parse()?;

        let defaults = Self::default();

        let entity_ttl_secs = lookup("CACHE_ENTITY_TTL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.entity_ttl_secs);

        let max_capacity = lookup("CACHE_MAX_CAPACITY")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_capacity);

        Ok(Self {
            store,
            redis_url: lookup("REDIS_URL"),
            key_prefix: lookup("CACHE_KEY_PREFIX").unwrap_or_default(),
            entity_ttl_secs,
            max_capacity,
        })
    }
}

/// Factory for creating cache stores
#[derive(Debug, Default)]
pub struct CacheStoreFactory;

impl CacheStoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates a store based on configuration
    pub async fn create(&self, config: &CacheConfig) -> Result<Arc<dyn CacheStore>, DomainError> {
        match config.store {
            CacheStoreType::InMemory => {
                let store = InMemoryCacheStore::with_config(
                    InMemoryCacheConfig::default().with_max_capacity(config.max_capacity),
                );
                Ok(Arc::new(store))
            }
            CacheStoreType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for the Redis cache store")
                })?;

                let store = RedisCacheStore::new(RedisCacheConfig::new(url)).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_store_type_from_str() {
        assert_eq!(
            "in_memory".parse::<CacheStoreType>().unwrap(),
            CacheStoreType::InMemory
        );
        assert_eq!(
            "Memory".parse::<CacheStoreType>().unwrap(),
            CacheStoreType::InMemory
        );
        assert_eq!("redis".parse::<CacheStoreType>().unwrap(), CacheStoreType::Redis);
        assert!("memcached".parse::<CacheStoreType>().is_err());
    }

    #[test]
    fn test_store_type_display() {
        assert_eq!(CacheStoreType::InMemory.to_string(), "in_memory");
        assert_eq!(CacheStoreType::Redis.to_string(), "redis");
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .with_key_prefix("app:")
            .with_entity_ttl(Duration::from_secs(600));

        assert_eq!(config.store, CacheStoreType::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.key_prefix, "app:");
        assert_eq!(config.entity_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CACHE_STORE", "redis"),
            ("REDIS_URL", "redis://cache:6379"),
            ("CACHE_KEY_PREFIX", "app:"),
            ("CACHE_ENTITY_TTL_SECS", "90"),
            ("CACHE_MAX_CAPACITY", "not-a-number"),
        ]);

        let config =
            CacheConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.store, CacheStoreType::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.key_prefix, "app:");
        assert_eq!(config.entity_ttl(), Duration::from_secs(90));
        assert_eq!(config.max_capacity, CacheConfig::default().max_capacity);
    }

    #[test]
    fn test_config_from_lookup_defaults() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.store, CacheStoreType::InMemory);
        assert!(config.redis_url.is_none());

        let result = CacheConfig::from_lookup(|name| {
            (name == "CACHE_STORE").then(|| "memcached".to_string())
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_in_memory() {
        let factory = CacheStoreFactory::new();
        let store = factory.create(&CacheConfig::in_memory()).await.unwrap();

        store.set_raw("key", "1", None).await.unwrap();
        assert_eq!(store.get_raw("key").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_redis_requires_url() {
        let config = CacheConfig {
            store: CacheStoreType::Redis,
            ..Default::default()
        };

        let result = CacheStoreFactory::new().create(&config).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }
}
