//! Entity store factory for runtime backend selection

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::domain::entity::{Attributes, EntityStore};
use crate::domain::DomainError;

use super::in_memory::InMemoryEntityStore;
use super::postgres::{PostgresConfig, PostgresEntityStore};

/// Supported entity store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// In-memory store (for testing/development)
    #[default]
    InMemory,
    /// PostgreSQL store
    Postgres,
}

impl FromStr for StorageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Ok(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => Err(DomainError::configuration(format!(
                "Unknown storage backend: {}. Valid backends: in_memory, postgres",
                s
            ))),
        }
    }
}

/// Entity storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageType,
    pub postgres: PostgresConfig,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// PostgreSQL configuration from a URL
    pub fn postgres_url(url: impl Into<String>) -> Self {
        Self {
            backend: StorageType::Postgres,
            postgres: PostgresConfig::new(url),
        }
    }
}

/// Factory for creating entity stores
#[derive(Debug)]
pub struct EntityStoreFactory;

impl EntityStoreFactory {
    /// Creates a store for one entity table based on the configuration
    pub async fn create<A>(
        config: &StorageConfig,
        table_name: &str,
    ) -> Result<Arc<dyn EntityStore<A>>, DomainError>
    where
        A: Attributes,
    {
        match config.backend {
            StorageType::InMemory => Ok(Arc::new(InMemoryEntityStore::<A>::new())),
            StorageType::Postgres => {
                let store = PostgresEntityStore::<A>::connect(&config.postgres, table_name).await?;
                store.ensure_table().await?;
                Ok(Arc::new(store))
            }
        }
    }
}
