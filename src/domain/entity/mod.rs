//! Entity domain - tenant-scoped records, filters and the data store seam

mod filter;
mod query;
mod record;
mod store;
mod tenant;

pub use filter::{parse_timestamp, ListFilters, TimeRange, DEFAULT_LIMIT, DEFAULT_RANGE_DAYS};
pub use query::{EntityQuery, OrderBy, Predicate, Scope};
pub use record::{Attributes, EntityId, NewRecord, Record, TenantId, RECORD_COLUMNS};
pub use store::EntityStore;
pub use tenant::{FixedTenant, SystemContext, TaskLocalTenant, TenantContext};

#[cfg(test)]
pub use tenant::MockTenantContext;
