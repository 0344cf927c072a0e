//! Expiry heuristic for values stored without an explicit TTL

use std::time::Duration;

use serde_json::Value;

/// Chooses a TTL from the shape and encoded size of a value
///
/// Scalars are cheap to recompute wrong but also cheap to keep, so they live
/// longest. Large collections churn fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartTtl {
    pub null_ttl: Duration,
    pub scalar_ttl: Duration,
    pub small_string_ttl: Duration,
    pub large_string_ttl: Duration,
    pub small_collection_ttl: Duration,
    pub medium_collection_ttl: Duration,
    pub large_collection_ttl: Duration,
    /// Strings at or under this many bytes count as small
    pub small_string_bytes: usize,
    /// Collections at or under this many encoded bytes count as small
    pub small_collection_bytes: usize,
    /// Collections at or under this many encoded bytes count as medium
    pub medium_collection_bytes: usize,
}

impl Default for SmartTtl {
    fn default() -> Self {
        Self {
            null_ttl: Duration::from_secs(300),
            scalar_ttl: Duration::from_secs(3600),
            small_string_ttl: Duration::from_secs(3600),
            large_string_ttl: Duration::from_secs(1800),
            small_collection_ttl: Duration::from_secs(1800),
            medium_collection_ttl: Duration::from_secs(900),
            large_collection_ttl: Duration::from_secs(300),
            small_string_bytes: 1024,
            small_collection_bytes: 10 * 1024,
            medium_collection_bytes: 100 * 1024,
        }
    }
}

impl SmartTtl {
    /// TTL for a value whose JSON encoding is `encoded_len` bytes long
    pub fn ttl_for(&self, value: &Value, encoded_len: usize) -> Duration {
        match value {
            Value::Null => self.null_ttl,
            Value::Bool(_) | Value::Number(_) => self.scalar_ttl,
            Value::String(s) if s.len() <= self.small_string_bytes => self.small_string_ttl,
            Value::String(_) => self.large_string_ttl,
            Value::Array(_) | Value::Object(_) => {
                if encoded_len <= self.small_collection_bytes {
                    self.small_collection_ttl
                } else if encoded_len <= self.medium_collection_bytes {
                    self.medium_collection_ttl
                } else {
                    self.large_collection_ttl
                }
            }
        }
    }
}
