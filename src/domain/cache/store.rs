//! Backing key-value store capability

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DomainError;

/// Key-value store the cache layer sits on
///
/// Values are JSON strings so the trait stays dyn-compatible. A `None` TTL
/// means the entry never expires. Prefix scanning is part of the contract
/// because tag wipes cannot be implemented without it.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Gets a raw value
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Stores a raw value, replacing any existing one
    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), DomainError>;

    /// Stores a value only if the key is absent, atomically
    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError>;

    /// Deletes a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Checks whether a key exists
    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get_raw(key).await?.is_some())
    }

    /// Gets several keys; absent keys are left out of the map
    async fn get_many_raw(&self, keys: &[String]) -> Result<HashMap<String, String>, DomainError> {
        let mut found = HashMap::with_capacity(keys.len());

        for key in keys {
            if let Some(value) = self.get_raw(key).await? {
                found.insert(key.clone(), value);
            }
        }

        Ok(found)
    }

    /// Stores several values with one TTL. Not atomic across keys.
    async fn set_many_raw(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), DomainError> {
        for (key, value) in entries {
            self.set_raw(key, value, ttl).await?;
        }

        Ok(())
    }

    /// Lists every key starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DomainError>;

    /// Deletes every key starting with `prefix`, returning how many went
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, DomainError> {
        let mut deleted = 0;

        for key in self.scan_prefix(prefix).await? {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Removes every entry
    async fn clear(&self) -> Result<(), DomainError>;

    /// Approximate number of entries
    async fn size(&self) -> Result<usize, DomainError>;

    /// Bytes used by the store, if it reports them
    async fn memory_usage(&self) -> Result<Option<u64>, DomainError> {
        Ok(None)
    }

    /// Round-trips to the store
    async fn ping(&self) -> Result<(), DomainError> {
        self.exists("__ping__").await.map(|_| ())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock store for testing, with switchable failure
    #[derive(Debug, Default)]
    pub struct MockCacheStore {
        entries: Mutex<BTreeMap<String, (String, Option<Duration>)>>,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl MockCacheStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_entry(self, key: &str, raw: &str) -> Self {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (raw.to_string(), None));
            self
        }

        /// Makes every subsequent call fail (or succeed again)
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn ttl_of(&self, key: &str) -> Option<Option<Duration>> {
            self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
        }

        pub fn raw(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).map(|(raw, _)| raw.clone())
        }

        pub fn keys(&self) -> Vec<String> {
            self.entries.lock().unwrap().keys().cloned().collect()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                return Err(DomainError::cache("store unavailable"));
            }

            Ok(())
        }
    }

    #[async_trait]
    impl CacheStore for MockCacheStore {
        async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
            self.check()?;
            Ok(self.raw(key))
        }

        async fn set_raw(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<(), DomainError> {
            self.check()?;
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), ttl));
            Ok(())
        }

        async fn add_raw(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<bool, DomainError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();

            if entries.contains_key(key) {
                return Ok(false);
            }

            entries.insert(key.to_string(), (value.to_string(), ttl));
            Ok(true)
        }

        async fn delete(&self, key: &str) -> Result<bool, DomainError> {
            self.check()?;
            Ok(self.entries.lock().unwrap().remove(key).is_some())
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DomainError> {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn clear(&self) -> Result<(), DomainError> {
            self.check()?;
            self.entries.lock().unwrap().clear();
            Ok(())
        }

        async fn size(&self) -> Result<usize, DomainError> {
            self.check()?;
            Ok(self.entries.lock().unwrap().len())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_default_delete_prefix() {
            let store = MockCacheStore::new()
                .with_entry("user:1", "1")
                .with_entry("user:2", "2")
                .with_entry("users:3", "3");

            let deleted = store.delete_prefix("user:").await.unwrap();
            assert_eq!(deleted, 2);
            assert_eq!(store.keys(), vec!["users:3".to_string()]);
        }

        #[tokio::test]
        async fn test_default_get_many() {
            let store = MockCacheStore::new().with_entry("a", "1");
            let keys = vec!["a".to_string(), "b".to_string()];

            let found = store.get_many_raw(&keys).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found.get("a"), Some(&"1".to_string()));
        }

        #[tokio::test]
        async fn test_failing_store() {
            let store = MockCacheStore::new();
            store.set_failing(true);

            assert!(store.get_raw("a").await.is_err());
            assert!(store.ping().await.is_err());

            store.set_failing(false);
            assert!(store.ping().await.is_ok());
        }
    }
}
