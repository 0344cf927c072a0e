//! Entity data store trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use super::query::{EntityQuery, Scope};
use super::record::{Attributes, EntityId, NewRecord, Record};
use crate::domain::DomainError;

/// Record-oriented store backing an entity repository
#[async_trait]
pub trait EntityStore<A>: Send + Sync + Debug
where
    A: Attributes,
{
    /// Retrieves a record by primary key if visible through `scope`
    async fn find(&self, id: EntityId, scope: &Scope) -> Result<Option<Record<A>>, DomainError>;

    /// Inserts a record, assigning its id and timestamps
    async fn insert(&self, record: NewRecord<A>) -> Result<Record<A>, DomainError>;

    /// Persists status and attributes of an existing live record, bumping
    /// `updated_at`
    async fn update(&self, record: Record<A>) -> Result<Record<A>, DomainError>;

    /// Tombstones a record, returning whether a live one was found
    async fn soft_delete(&self, id: EntityId, scope: &Scope) -> Result<bool, DomainError>;

    /// Runs a filtered, ordered, paginated query
    async fn query(&self, query: &EntityQuery) -> Result<Vec<Record<A>>, DomainError>;

    /// Counts the records a query matches, ignoring pagination
    async fn count(&self, query: &EntityQuery) -> Result<usize, DomainError>;

    /// Sets the status of every listed record, returning how many changed
    async fn update_status(
        &self,
        ids: &[EntityId],
        status: &str,
        scope: &Scope,
    ) -> Result<usize, DomainError>;
}
