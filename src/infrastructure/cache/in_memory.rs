//! In-memory cache store implementation using moka

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum total size of keys and values, in bytes
    pub max_capacity: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 64 * 1024 * 1024,
        }
    }
}

impl InMemoryCacheConfig {
    /// Sets the byte budget
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }
}

/// Value stored in moka together with its own lifetime
#[derive(Debug, Clone)]
struct StoredValue {
    data: String,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was written with
struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Thread-safe in-process store
///
/// Features:
/// - TTL per entry, `None` never expires
/// - Size-weighted eviction once the byte budget is reached
/// - Atomic add-if-absent through moka's entry API
///
/// Entries written by `add_raw` (locks) live in a separate cache without a
/// byte budget, so eviction never frees a lock before its lease ends.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    cache: MokaCache<String, StoredValue>,
    leases: MokaCache<String, StoredValue>,
    config: InMemoryCacheConfig,
}

impl InMemoryCacheStore {
    /// Creates a store with the default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    /// Creates a store with the given configuration
    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .weigher(weigh)
            .expire_after(PerEntryExpiry)
            .build();

        let leases = MokaCache::builder()
            .weigher(weigh)
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            cache,
            leases,
            config,
        }
    }

    pub fn config(&self) -> &InMemoryCacheConfig {
        &self.config
    }

    async fn run_pending_tasks(&self) {
        self.leases.run_pending_tasks().await;
        self.cache.run_pending_tasks().await;
    }
}

fn weigh(key: &String, value: &StoredValue) -> u32 {
    u32::try_from(key.len() + value.data.len()).unwrap_or(u32::MAX)
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        if let Some(entry) = self.leases.get(key).await {
            return Ok(Some(entry.data));
        }

        Ok(self.cache.get(key).await.map(|entry| entry.data))
    }

    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), DomainError> {
        let entry = StoredValue {
            data: value.to_string(),
            ttl,
        };

        self.leases.remove(key).await;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        if self.cache.contains_key(key) {
            return Ok(false);
        }

        let candidate = StoredValue {
            data: value.to_string(),
            ttl,
        };

        let entry = self
            .leases
            .entry(key.to_string())
            .or_insert_with(async move { candidate })
            .await;

        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let lease = self.leases.remove(key).await.is_some();
        let entry = self.cache.remove(key).await.is_some();

        Ok(lease || entry)
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.leases.contains_key(key) || self.cache.contains_key(key))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DomainError> {
        self.run_pending_tasks().await;

        Ok(self
            .leases
            .iter()
            .chain(self.cache.iter())
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.as_ref().clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.leases.invalidate_all();
        self.cache.invalidate_all();
        self.run_pending_tasks().await;
        Ok(())
    }

    async fn size(&self) -> Result<usize, DomainError> {
        self.run_pending_tasks().await;
        Ok((self.leases.entry_count() + self.cache.entry_count()) as usize)
    }

    async fn memory_usage(&self) -> Result<Option<u64>, DomainError> {
        self.run_pending_tasks().await;
        Ok(Some(self.leases.weighted_size() + self.cache.weighted_size()))
    }

    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Option<Duration> {
        Some(Duration::from_secs(n))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryCacheStore::new();

        store.set_raw("key1", "\"value1\"", secs(60)).await.unwrap();

        let result = store.get_raw("key1").await.unwrap();
        assert_eq!(result, Some("\"value1\"".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryCacheStore::new();

        assert!(store.get_raw("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryCacheStore::new();
        store.set_raw("key1", "1", secs(60)).await.unwrap();

        assert!(store.delete("key1").await.unwrap());
        assert!(!store.delete("key1").await.unwrap());
        assert!(store.get_raw("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists() {
        let store = InMemoryCacheStore::new();
        store.set_raw("key1", "1", secs(60)).await.unwrap();

        assert!(store.exists("key1").await.unwrap());
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = InMemoryCacheStore::new();

        store
            .set_raw("key1", "1", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(store.exists("key1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get_raw("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_ttl_survives() {
        let store = InMemoryCacheStore::new();
        store.set_raw("forever", "1", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.get_raw("forever").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_overwrite_takes_new_ttl() {
        let store = InMemoryCacheStore::new();
        store.set_raw("key1", "1", None).await.unwrap();
        store
            .set_raw("key1", "2", Some(Duration::from_millis(50)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get_raw("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_is_exclusive() {
        let store = InMemoryCacheStore::new();

        assert!(store.add_raw("lock:a", "t1", secs(60)).await.unwrap());
        assert!(!store.add_raw("lock:a", "t2", secs(60)).await.unwrap());
        assert_eq!(store.get_raw("lock:a").await.unwrap(), Some("t1".to_string()));
    }

    #[tokio::test]
    async fn test_add_after_expiry() {
        let store = InMemoryCacheStore::new();

        assert!(store
            .add_raw("lock:a", "t1", Some(Duration::from_millis(50)))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.add_raw("lock:a", "t2", secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_added_entry_survives_eviction() {
        let store = InMemoryCacheStore::with_config(
            InMemoryCacheConfig::default().with_max_capacity(200),
        );
        assert!(store.add_raw("lock:job", "holder", secs(60)).await.unwrap());

        for i in 0..200 {
            let key = format!("filler:{}", i);
            store.set_raw(&key, "01234567890123456789", secs(60)).await.unwrap();
            store.get_raw(&key).await.unwrap();
        }
        store.run_pending_tasks().await;

        assert!(!store.add_raw("lock:job", "other", secs(60)).await.unwrap());
        assert_eq!(store.get_raw("lock:job").await.unwrap(), Some("holder".to_string()));
    }

    #[tokio::test]
    async fn test_added_entry_delete_and_overwrite() {
        let store = InMemoryCacheStore::new();
        assert!(store.add_raw("lock:a", "t1", secs(60)).await.unwrap());

        assert!(store.exists("lock:a").await.unwrap());
        assert_eq!(store.scan_prefix("lock:").await.unwrap(), vec!["lock:a".to_string()]);
        assert!(store.delete("lock:a").await.unwrap());
        assert!(!store.exists("lock:a").await.unwrap());

        store.set_raw("plain", "1", None).await.unwrap();
        assert!(!store.add_raw("plain", "2", None).await.unwrap());

        assert!(store.add_raw("lock:b", "t1", secs(60)).await.unwrap());
        store.set_raw("lock:b", "t2", None).await.unwrap();
        assert_eq!(store.get_raw("lock:b").await.unwrap(), Some("t2".to_string()));
        assert_eq!(store.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_and_delete_prefix() {
        let store = InMemoryCacheStore::new();
        store.set_raw("user:find_1", "1", secs(60)).await.unwrap();
        store.set_raw("user:find_2", "2", secs(60)).await.unwrap();
        store.set_raw("users:find_3", "3", secs(60)).await.unwrap();

        let mut keys = store.scan_prefix("user:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:find_1".to_string(), "user:find_2".to_string()]);

        let deleted = store.delete_prefix("user:").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_memory() {
        let store = InMemoryCacheStore::new();
        store.set_raw("key1", "value", secs(60)).await.unwrap();

        assert_eq!(store.memory_usage().await.unwrap(), Some(9));

        store.clear().await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_many_and_set_many() {
        let store = InMemoryCacheStore::new();
        let entries = vec![
            ("key1".to_string(), "1".to_string()),
            ("key2".to_string(), "2".to_string()),
        ];
        store.set_many_raw(&entries, secs(60)).await.unwrap();

        let keys = vec!["key1".to_string(), "key2".to_string(), "key3".to_string()];
        let found = store.get_many_raw(&keys).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found.get("key2"), Some(&"2".to_string()));
    }

    #[test]
    fn test_config() {
        let store = InMemoryCacheStore::with_config(
            InMemoryCacheConfig::default().with_max_capacity(1024),
        );

        assert_eq!(store.config().max_capacity, 1024);
    }
}
