//! In-memory entity store implementation

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::domain::entity::{
    Attributes, EntityId, EntityQuery, EntityStore, NewRecord, Record, Scope,
};
use crate::domain::DomainError;

/// Thread-safe in-memory entity store
///
/// Useful for testing and development. Data is lost when the process terminates.
#[derive(Debug)]
pub struct InMemoryEntityStore<A>
where
    A: Attributes,
{
    records: RwLock<BTreeMap<i64, Record<A>>>,
    sequence: AtomicI64,
}

impl<A> Default for InMemoryEntityStore<A>
where
    A: Attributes,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> InMemoryEntityStore<A>
where
    A: Attributes,
{
    /// Creates a new empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(0),
        }
    }

    /// Creates a store pre-populated with records, keeping their ids and
    /// timestamps
    pub fn with_records(records: Vec<Record<A>>) -> Self {
        let max_id = records.iter().map(|r| r.id.value()).max().unwrap_or(0);
        let map = records.into_iter().map(|r| (r.id.value(), r)).collect();

        Self {
            records: RwLock::new(map),
            sequence: AtomicI64::new(max_id),
        }
    }

    fn next_id(&self) -> EntityId {
        EntityId::new(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Records matching a query's scope and predicates, sorted, unpaginated
    fn matching(&self, query: &EntityQuery) -> Result<Vec<(Value, Record<A>)>, DomainError> {
        let records = self.records.read().map_err(|e| {
            DomainError::storage(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut rows = Vec::new();

        for record in records.values().filter(|r| query.scope.admits(r)) {
            let row = serde_json::to_value(record).map_err(|e| {
                DomainError::storage(format!("Failed to serialize record {}: {}", record.id, e))
            })?;

            if query.matches(&row) {
                rows.push((row, record.clone()));
            }
        }

        rows.sort_by(|(a, _), (b, _)| query.order.compare(a, b));
        Ok(rows)
    }
}

#[async_trait]
impl<A> EntityStore<A> for InMemoryEntityStore<A>
where
    A: Attributes,
{
    async fn find(&self, id: EntityId, scope: &Scope) -> Result<Option<Record<A>>, DomainError> {
        let records = self.records.read().map_err(|e| {
            DomainError::storage(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(records
            .get(&id.value())
            .filter(|record| scope.admits(record))
            .cloned())
    }

    async fn insert(&self, record: NewRecord<A>) -> Result<Record<A>, DomainError> {
        let record = record.into_record(self.next_id(), Utc::now());
        let mut records = self.records.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        records.insert(record.id.value(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: Record<A>) -> Result<Record<A>, DomainError> {
        let mut records = self.records.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        let stored = records
            .get_mut(&record.id.value())
            .filter(|stored| !stored.is_trashed())
            .ok_or_else(|| DomainError::not_found("record", record.id))?;

        stored.status = record.status;
        stored.attributes = record.attributes;
        stored.updated_at = Utc::now().max(stored.updated_at);

        Ok(stored.clone())
    }

    async fn soft_delete(&self, id: EntityId, scope: &Scope) -> Result<bool, DomainError> {
        let mut records = self.records.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        match records.get_mut(&id.value()) {
            Some(record) if scope.admits(record) && !record.is_trashed() => {
                record.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query(&self, query: &EntityQuery) -> Result<Vec<Record<A>>, DomainError> {
        let rows = self.matching(query)?;
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn count(&self, query: &EntityQuery) -> Result<usize, DomainError> {
        Ok(self.matching(&query.unpaginated())?.len())
    }

    async fn update_status(
        &self,
        ids: &[EntityId],
        status: &str,
        scope: &Scope,
    ) -> Result<usize, DomainError> {
        let mut records = self.records.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        let now = Utc::now();
        let mut updated = 0;

        for id in ids {
            if let Some(record) = records.get_mut(&id.value()).filter(|r| scope.admits(r)) {
                record.status = Some(status.to_string());
                record.updated_at = now;
                updated += 1;
            }
        }

        Ok(updated)
    }
}
