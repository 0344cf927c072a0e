//! Cache service - remember/tag/lock semantics over a pluggable store

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::cache::{self, CacheStats, CacheStore, SmartTtl, StatsSnapshot};
use crate::domain::DomainError;

/// TTL of counters written by `increment`/`decrement`
pub const COUNTER_TTL: Duration = Duration::from_secs(3600);

/// Shortest lease a lock is taken for
pub const MIN_LOCK_LEASE: Duration = Duration::from_secs(1);

/// Segment inserted between the prefix and a lock name
///
/// Reserved: tag operations refuse tags that would address this segment.
pub const LOCK_NAMESPACE: &str = "lock";

/// Loader handed to [`CacheService::warmup`]
pub type WarmupLoader<'a, V> = Box<dyn FnOnce() -> BoxFuture<'a, Option<V>> + Send + 'a>;

/// Suffixes stripped from owner type names when deriving a tag
const TAG_SUFFIXES: [&str; 3] = ["Repository", "Service", "Hooks"];

/// Typed caching on top of a [`CacheStore`]
///
/// Built once at startup and shared as `Arc<CacheService>`. Every method
/// swallows store failures: they are logged and turned into a miss, `false`
/// or `0`, so a cache outage slows callers down without failing them.
///
/// TTL arguments follow one convention throughout: `None` picks a TTL from
/// the value with [`SmartTtl`], `Some(Duration::ZERO)` stores without
/// expiry and any other duration is used as given.
#[derive(Debug)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttl_policy: SmartTtl,
    stats: Arc<CacheStats>,
    tags: RwLock<HashMap<&'static str, String>>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            prefix: String::new(),
            ttl_policy: SmartTtl::default(),
            stats: Arc::new(CacheStats::new()),
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the prefix prepended to every key
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replaces the TTL heuristic
    pub fn with_ttl_policy(mut self, policy: SmartTtl) -> Self {
        self.ttl_policy = policy;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Logical key `{namespace}:{part}:...`, empty parts dropped
    pub fn build_key<I, S>(&self, namespace: &str, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        cache::build_key("", namespace, parts)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn tagged_key(tag: &str, key: &str) -> String {
        format!("{}{}{}", tag, cache::KEY_DELIMITER, key)
    }

    /// Whether `tag` would address the lock segment
    pub fn is_reserved_tag(tag: &str) -> bool {
        tag == LOCK_NAMESPACE
            || tag
                .strip_prefix(LOCK_NAMESPACE)
                .is_some_and(|rest| rest.starts_with(cache::KEY_DELIMITER))
    }

    fn refuse_reserved(tag: &str) -> bool {
        let reserved = Self::is_reserved_tag(tag);

        if reserved {
            warn!(tag = %tag, "Tag is reserved for locks, bypassing cache");
        }

        reserved
    }

    fn lock_key(&self, key: &str) -> String {
        self.full_key(&Self::tagged_key(LOCK_NAMESPACE, key))
    }

    /// Serializes a value and resolves the TTL it should be stored with
    fn encode<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Option<(String, Option<Duration>)> {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value");
                return None;
            }
        };

        let raw = json.to_string();
        let ttl = match ttl {
            None => Some(self.ttl_policy.ttl_for(&json, raw.len())),
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some(ttl),
        };

        Some((raw, ttl))
    }

    async fn read<V: DeserializeOwned>(&self, full_key: &str) -> Option<V> {
        let raw = match self.store.get_raw(full_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed");
                None
            }
        };

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding undecodable cache entry");
                None
            }
        });

        if value.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        value
    }

    async fn write_full<V: Serialize + ?Sized>(
        &self,
        full_key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        let Some((raw, ttl)) = self.encode(full_key, value, ttl) else {
            return false;
        };

        match self.store.set_raw(full_key, &raw, ttl).await {
            Ok(()) => {
                self.stats.record_set();
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn delete_full(&self, full_key: &str) -> bool {
        match self.store.delete(full_key).await {
            Ok(deleted) => {
                if deleted {
                    self.stats.record_deletes(1);
                }
                deleted
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Cached value, if present and decodable
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.read(&self.full_key(key)).await
    }

    /// Cached value, or `default` on a miss
    pub async fn get_or<V: DeserializeOwned>(&self, key: &str, default: V) -> V {
        self.get(key).await.unwrap_or(default)
    }

    /// Stores a value, returning whether the store accepted it
    pub async fn put<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        self.write_full(&self.full_key(key), value, ttl).await
    }

    /// Stores several values; with `ttl: None` each gets its own smart TTL
    pub async fn put_many<V: Serialize>(&self, entries: &[(String, V)], ttl: Option<Duration>) -> bool {
        if ttl.is_none() {
            let mut all_stored = true;

            for (key, value) in entries {
                all_stored &= self.put(key, value, None).await;
            }

            return all_stored;
        }

        let mut encoded = Vec::with_capacity(entries.len());
        let mut store_ttl = None;

        for (key, value) in entries {
            let Some((raw, resolved)) = self.encode(key, value, ttl) else {
                return false;
            };
            store_ttl = resolved;
            encoded.push((self.full_key(key), raw));
        }

        match self.store.set_many_raw(&encoded, store_ttl).await {
            Ok(()) => {
                for _ in &encoded {
                    self.stats.record_set();
                }
                true
            }
            Err(e) => {
                warn!(count = encoded.len(), error = %e, "Cache batch write failed");
                false
            }
        }
    }

    /// Cached values for the keys that hit, keyed by the caller's keys
    pub async fn get_many<V: DeserializeOwned>(&self, keys: &[&str]) -> HashMap<String, V> {
        let full_keys: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();

        let raw = match self.store.get_many_raw(&full_keys).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Cache batch read failed");
                HashMap::new()
            }
        };

        let mut found = HashMap::with_capacity(raw.len());

        for (key, full_key) in keys.iter().zip(&full_keys) {
            let decoded = raw
                .get(full_key)
                .and_then(|raw| serde_json::from_str::<V>(raw).ok());

            match decoded {
                Some(value) => {
                    self.stats.record_hit();
                    found.insert(key.to_string(), value);
                }
                None => self.stats.record_miss(),
            }
        }

        found
    }

    /// Cached value, or the loader's result which is then cached
    ///
    /// A loader returning `None` is not cached, so the next call runs it
    /// again.
    pub async fn remember<V, F, Fut>(&self, key: &str, ttl: Option<Duration>, loader: F) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        self.remember_full(&self.full_key(key), ttl, loader).await
    }

    async fn remember_full<V, F, Fut>(&self, full_key: &str, ttl: Option<Duration>, loader: F) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if let Some(value) = self.read(full_key).await {
            return Some(value);
        }

        let value = loader().await?;
        self.write_full(full_key, &value, ttl).await;
        Some(value)
    }

    /// [`remember`](Self::remember) with a fallible loader; loader errors
    /// propagate and nothing is cached
    pub async fn try_remember<V, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<V>, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        self.try_remember_full(&self.full_key(key), ttl, loader).await
    }

    async fn try_remember_full<V, E, F, Fut>(
        &self,
        full_key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<V>, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(value) = self.read(full_key).await {
            return Ok(Some(value));
        }

        let Some(value) = loader().await? else {
            return Ok(None);
        };

        self.write_full(full_key, &value, ttl).await;
        Ok(Some(value))
    }

    /// Remember without expiry
    pub async fn remember_forever<V, F, Fut>(&self, key: &str, loader: F) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        self.remember(key, Some(Duration::ZERO), loader).await
    }

    /// Remember when `condition` holds, otherwise just run the loader
    pub async fn when<V, F, Fut>(
        &self,
        condition: bool,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if condition {
            self.remember(key, ttl, loader).await
        } else {
            loader().await
        }
    }

    /// Removes a key, returning whether it existed
    pub async fn forget(&self, key: &str) -> bool {
        self.delete_full(&self.full_key(key)).await
    }

    /// Whether a key is present; does not count as a hit or miss
    pub async fn has(&self, key: &str) -> bool {
        let full_key = self.full_key(key);

        self.store.exists(&full_key).await.unwrap_or_else(|e| {
            warn!(key = %full_key, error = %e, "Cache existence check failed");
            false
        })
    }

    /// Adds `delta` to a counter (missing counts as 0) and returns the result
    ///
    /// Read-modify-write, not atomic: concurrent increments can lose updates.
    /// The counter is rewritten with a one hour TTL.
    pub async fn increment(&self, key: &str, delta: i64) -> i64 {
        let current: i64 = self.get(key).await.unwrap_or(0);
        let next = current.saturating_add(delta);

        self.put(key, &next, Some(COUNTER_TTL)).await;
        next
    }

    /// Subtracts `delta` from a counter; same caveats as `increment`
    pub async fn decrement(&self, key: &str, delta: i64) -> i64 {
        self.increment(key, delta.saturating_neg()).await
    }

    /// Stores only if the key is absent
    ///
    /// Check-then-put: two racing callers can both succeed. Use
    /// [`lock`](Self::lock) when exclusivity matters.
    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        if self.has(key).await {
            return false;
        }

        self.put(key, value, ttl).await
    }

    /// Takes the named lock for `lease`, returning whether this caller got it
    ///
    /// Acquisition is atomic in the store. The lock frees itself when the
    /// lease runs out; leases shorter than a second are rounded up.
    pub async fn lock(&self, key: &str, lease: Duration) -> bool {
        let lock_key = self.lock_key(key);
        let holder = serde_json::Value::String(Uuid::new_v4().to_string()).to_string();
        let lease = lease.max(MIN_LOCK_LEASE);

        match self.store.add_raw(&lock_key, &holder, Some(lease)).await {
            Ok(acquired) => {
                debug!(lock = %lock_key, acquired, "Lock attempt");
                acquired
            }
            Err(e) => {
                warn!(lock = %lock_key, error = %e, "Lock attempt failed");
                false
            }
        }
    }

    /// Releases the named lock whoever holds it
    pub async fn unlock(&self, key: &str) -> bool {
        let lock_key = self.lock_key(key);

        match self.store.delete(&lock_key).await {
            Ok(released) => released,
            Err(e) => {
                warn!(lock = %lock_key, error = %e, "Lock release failed");
                false
            }
        }
    }

    /// Runs `callback` while holding the named lock
    ///
    /// Fails fast with [`DomainError::LockAcquisition`] when the lock is
    /// held. The lock is released however the callback ends, including by
    /// panic, which is resumed after the release. When the returned future is
    /// dropped before completion the release is spawned on the runtime.
    pub async fn locked<T, E, F, Fut>(&self, key: &str, lease: Duration, callback: F) -> Result<T, E>
    where
        E: From<DomainError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.lock(key, lease).await {
            return Err(DomainError::lock_acquisition(key).into());
        }

        let mut release = LockRelease::new(self.store.clone(), self.lock_key(key));

        let outcome = AssertUnwindSafe(async move { callback().await })
            .catch_unwind()
            .await;

        self.unlock(key).await;
        release.disarm();

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Remember under `{tag}:{key}`
    pub async fn tag<V, F, Fut>(&self, tag: &str, key: &str, ttl: Option<Duration>, loader: F) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if Self::refuse_reserved(tag) {
            return loader().await;
        }

        self.remember_full(&self.full_key(&Self::tagged_key(tag, key)), ttl, loader)
            .await
    }

    /// [`tag`](Self::tag) with a fallible loader
    pub async fn try_tag<V, E, F, Fut>(
        &self,
        tag: &str,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<V>, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if Self::refuse_reserved(tag) {
            return loader().await;
        }

        self.try_remember_full(&self.full_key(&Self::tagged_key(tag, key)), ttl, loader)
            .await
    }

    /// Cached value under `{tag}:{key}`
    pub async fn load<V: DeserializeOwned>(&self, tag: &str, key: &str) -> Option<V> {
        if Self::refuse_reserved(tag) {
            return None;
        }

        self.get(&Self::tagged_key(tag, key)).await
    }

    /// Stores a value under `{tag}:{key}`
    pub async fn write<V: Serialize + ?Sized>(
        &self,
        tag: &str,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> bool {
        if Self::refuse_reserved(tag) {
            return false;
        }

        self.put(&Self::tagged_key(tag, key), value, ttl).await
    }

    /// Removes `{tag}:{key}`
    pub async fn drop_tagged(&self, tag: &str, key: &str) -> bool {
        if Self::refuse_reserved(tag) {
            return false;
        }

        self.forget(&Self::tagged_key(tag, key)).await
    }

    /// Deletes every entry under the tag, returning how many went
    pub async fn wipe(&self, tag: &str) -> usize {
        if Self::refuse_reserved(tag) {
            return 0;
        }

        let prefix = self.full_key(&format!("{}{}", tag, cache::KEY_DELIMITER));

        match self.store.delete_prefix(&prefix).await {
            Ok(deleted) => {
                self.stats.record_deletes(deleted as u64);
                debug!(tag = %tag, deleted, "Wiped cache tag");
                deleted
            }
            Err(e) => {
                warn!(tag = %tag, error = %e, "Cache wipe failed");
                0
            }
        }
    }

    /// Clears the store, or only this service's keys when it has a prefix
    pub async fn flush(&self) -> bool {
        let result = if self.prefix.is_empty() {
            self.store.clear().await
        } else {
            self.store.delete_prefix(&self.prefix).await.map(|_| ())
        };

        match result {
            Ok(()) => {
                info!(prefix = %self.prefix, "Cache flushed");
                true
            }
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "Cache flush failed");
                false
            }
        }
    }

    /// Counters plus whatever the store reports about its size
    pub async fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.memory = self.store.memory_usage().await.ok().flatten();
        snapshot.entries = self.store.size().await.ok();
        snapshot
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Fills the keys that are not cached yet, returning how many were
    /// stored
    ///
    /// Keys are warmed one after another, so readers can see a partially
    /// warmed cache.
    pub async fn warmup<'a, V>(
        &self,
        entries: Vec<(String, WarmupLoader<'a, V>)>,
        ttl: Option<Duration>,
    ) -> usize
    where
        V: Serialize,
    {
        let mut warmed = 0;

        for (key, loader) in entries {
            if self.has(&key).await {
                continue;
            }

            if let Some(value) = loader().await {
                if self.put(&key, &value, ttl).await {
                    warmed += 1;
                }
            }
        }

        info!(warmed, "Cache warmup finished");
        warmed
    }

    /// Tag for an owner type, derived from its name once and memoized
    pub fn tag_for<T: ?Sized>(&self) -> String {
        let type_name = std::any::type_name::<T>();

        if let Some(tag) = self
            .tags
            .read()
            .ok()
            .and_then(|tags| tags.get(type_name).cloned())
        {
            return tag;
        }

        let tag = derive_tag(type_name);

        if let Ok(mut tags) = self.tags.write() {
            tags.insert(type_name, tag.clone());
        }

        tag
    }
}

/// Releases a lock when `locked` is dropped before it could unlock itself
struct LockRelease {
    store: Arc<dyn CacheStore>,
    lock_key: Option<String>,
}

impl LockRelease {
    fn new(store: Arc<dyn CacheStore>, lock_key: String) -> Self {
        Self {
            store,
            lock_key: Some(lock_key),
        }
    }

    fn disarm(&mut self) {
        self.lock_key = None;
    }
}

impl Drop for LockRelease {
    fn drop(&mut self) {
        let Some(lock_key) = self.lock_key.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %lock_key, "No runtime to release abandoned lock, it expires with its lease");
            return;
        };

        let store = self.store.clone();
        runtime.spawn(async move {
            match store.delete(&lock_key).await {
                Ok(_) => debug!(lock = %lock_key, "Released abandoned lock"),
                Err(e) => warn!(lock = %lock_key, error = %e, "Abandoned lock release failed"),
            }
        });
    }
}

/// Derives a tag from a type name: module path and generics dropped, one
/// `Repository`/`Service`/`Hooks` suffix stripped, then snake_cased
///
/// `app::UserService` gives `user`, `OrderLineRepository<Pg>` gives
/// `order_line`.
pub fn derive_tag(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let base = base.rsplit("::").next().unwrap_or(base);

    let stem = TAG_SUFFIXES
        .iter()
        .find_map(|suffix| base.strip_suffix(suffix).filter(|stem| !stem.is_empty()))
        .unwrap_or(base);

    let chars: Vec<char> = stem.chars().collect();
    let mut tag = String::with_capacity(stem.len() + 4);

    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());

            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                tag.push('_');
            }
        }

        tag.extend(c.to_lowercase());
    }

    tag
}
