//! Cache domain - key codec, store capability, TTL policy and counters

mod key;
mod stats;
mod store;
mod ttl;

pub use key::{build_key, CacheKeyBuilder, KEY_DELIMITER};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::CacheStore;
pub use ttl::SmartTtl;

#[cfg(test)]
pub use store::mock::MockCacheStore;
