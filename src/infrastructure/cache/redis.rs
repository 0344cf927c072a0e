//! Redis cache store implementation

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Keys fetched per SCAN round trip
    pub scan_count: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            scan_count: 100,
        }
    }
}

impl RedisCacheConfig {
    /// Creates a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the SCAN batch size
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }
}

/// Redis-backed store
///
/// Features:
/// - Millisecond TTLs (SET PX), plain SET for entries that never expire
/// - Atomic add-if-absent (SET NX)
/// - Prefix scans through SCAN, never KEYS
/// - Connection pooling via ConnectionManager
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCacheStore {
    /// Connects to Redis
    pub async fn new(config: RedisCacheConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| DomainError::cache(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection, config })
    }

    /// Connects with default settings
    pub async fn with_url(url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(RedisCacheConfig::new(url)).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        let mut found = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.config.scan_count)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    DomainError::cache(format!("Failed to scan keys with pattern '{}': {}", pattern, e))
                })?;

            found.extend(keys);
            cursor = next;

            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escapes glob metacharacters so a prefix matches literally in SCAN MATCH
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);

    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// Extracts `used_memory` from an `INFO memory` reply
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.get(key)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to get key '{}': {}", key, e)))
    }

    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to set key '{}': {}", key, e)))
    }

    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        // "OK" when stored, nil when the key already existed
        let result: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to add key '{}': {}", key, e)))?;

        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to delete key '{}': {}", key, e)))?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        conn.exists(key).await.map_err(|e| {
            DomainError::cache(format!("Failed to check existence of key '{}': {}", key, e))
        })
    }

    async fn get_many_raw(&self, keys: &[String]) -> Result<HashMap<String, String>, DomainError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.connection.clone();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to get {} keys: {}", keys.len(), e)))?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn set_many_raw(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), DomainError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();

        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = ttl {
                pipe.arg("PX").arg(ttl_millis(ttl));
            }
            pipe.ignore();
        }

        pipe.query_async::<()>(&mut conn).await.map_err(|e| {
            DomainError::cache(format!("Failed to set {} keys: {}", entries.len(), e))
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DomainError> {
        self.scan(&format!("{}*", escape_glob(prefix))).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, DomainError> {
        let keys = self.scan_prefix(prefix).await?;
        let mut conn = self.connection.clone();
        let mut total_deleted = 0usize;

        for batch in keys.chunks(self.config.scan_count) {
            let deleted: i64 = conn
                .del(batch)
                .await
                .map_err(|e| DomainError::cache(format!("Failed to delete keys: {}", e)))?;
            total_deleted += deleted as usize;
        }

        Ok(total_deleted)
    }

    async fn clear(&self) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to flush database: {}", e)))
    }

    async fn size(&self) -> Result<usize, DomainError> {
        let mut conn = self.connection.clone();

        redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to get database size: {}", e)))
    }

    async fn memory_usage(&self) -> Result<Option<u64>, DomainError> {
        let mut conn = self.connection.clone();

        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to read memory info: {}", e)))?;

        Ok(parse_used_memory(&info))
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Redis ping failed: {}", e)))?;

        Ok(())
    }
}
