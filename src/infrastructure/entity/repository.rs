//! Generic cached, tenant-scoped entity repository

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};
use validator::Validate;

use crate::domain::entity::{
    Attributes, EntityId, EntityQuery, EntityStore, ListFilters, NewRecord, Predicate, Record,
    Scope, TenantContext, RECORD_COLUMNS,
};
use crate::domain::DomainError;
use crate::infrastructure::cache::CacheService;

/// Cache TTL of entity lookups unless configured otherwise
pub const DEFAULT_ENTITY_TTL: Duration = Duration::from_secs(1800);

/// What a concrete entity plugs into [`EntityRepository`]
///
/// Every hook has a default, so the smallest implementation only names the
/// attributes type and the entity.
#[async_trait]
pub trait EntityHooks: Send + Sync + 'static {
    type Attributes: Attributes;

    /// Name used in errors and logs
    const ENTITY_NAME: &'static str;

    /// Explicit cache tag; derived from the hooks type name when `None`
    const CACHE_TAG: Option<&'static str> = None;

    /// Overrides the repository's default TTL for this entity
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }

    /// Fields accepting `[start, end]` range filters
    fn time_fields(&self) -> &'static [&'static str] {
        &["created_at", "updated_at"]
    }

    /// Fields searched by the `keyword` filter
    fn keyword_fields(&self) -> &'static [&'static str] {
        &[]
    }

    async fn validate_before_create(
        &self,
        data: Self::Attributes,
    ) -> Result<Self::Attributes, DomainError> {
        data.validate()?;
        Ok(data)
    }

    async fn validate_before_update(
        &self,
        _entity: &Record<Self::Attributes>,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, DomainError> {
        Ok(changes)
    }

    /// Rejects deletes that would break an invariant, typically with
    /// [`DomainError::ConstraintViolation`]
    async fn validate_before_delete(
        &self,
        _entity: &Record<Self::Attributes>,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn prepare_data_for_create(
        &self,
        data: Self::Attributes,
    ) -> Result<Self::Attributes, DomainError> {
        Ok(data)
    }

    async fn prepare_data_for_update(
        &self,
        _entity: &Record<Self::Attributes>,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, DomainError> {
        Ok(changes)
    }

    async fn after_create(&self, _entity: &Record<Self::Attributes>) -> Result<(), DomainError> {
        Ok(())
    }

    async fn after_update(
        &self,
        _entity: &Record<Self::Attributes>,
        _changes: &Map<String, Value>,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn after_delete(&self, _entity: &Record<Self::Attributes>) -> Result<(), DomainError> {
        Ok(())
    }

    /// Narrows a list query by keyword; searches `keyword_fields` by default
    fn apply_keyword_search(&self, query: EntityQuery, keyword: &str) -> EntityQuery {
        let fields = self.keyword_fields();

        if fields.is_empty() {
            return query;
        }

        query.filter(Predicate::search(fields.iter().copied(), keyword))
    }

    /// Applies entity-specific filters found in `filters.extra`
    fn apply_custom_filters(
        &self,
        query: EntityQuery,
        _filters: &ListFilters,
    ) -> Result<EntityQuery, DomainError> {
        Ok(query)
    }

    /// Drops cache entries outside the entity tag that mention the entity
    async fn clear_additional_cache(&self, _cache: &CacheService, _id: EntityId) {}
}

/// CRUD, listing and cache invalidation for one entity type
///
/// Lookups by id go through the cache under the entity tag; every write
/// wipes the whole tag. Lists and counts always hit the store.
pub struct EntityRepository<H>
where
    H: EntityHooks,
{
    hooks: H,
    store: Arc<dyn EntityStore<H::Attributes>>,
    cache: Arc<CacheService>,
    tenants: Arc<dyn TenantContext>,
    tag: String,
    default_ttl: Duration,
}

impl<H> fmt::Debug for EntityRepository<H>
where
    H: EntityHooks,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entity", &H::ENTITY_NAME)
            .field("tag", &self.tag)
            .field("default_ttl", &self.default_ttl)
            .field("store", &self.store)
            .finish()
    }
}

impl<H> EntityRepository<H>
where
    H: EntityHooks,
{
    pub fn new(
        hooks: H,
        store: Arc<dyn EntityStore<H::Attributes>>,
        cache: Arc<CacheService>,
        tenants: Arc<dyn TenantContext>,
    ) -> Self {
        let tag = match H::CACHE_TAG {
            Some(tag) => tag.to_string(),
            None => cache.tag_for::<H>(),
        };

        Self {
            hooks,
            store,
            cache,
            tenants,
            tag,
            default_ttl: DEFAULT_ENTITY_TTL,
        }
    }

    /// Sets the TTL used when the hooks name none
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// TTL of cached lookups
    pub fn cache_ttl(&self) -> Duration {
        self.hooks.cache_ttl().unwrap_or(self.default_ttl)
    }

    /// Cache tag all of this entity's lookups live under
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Cache key of the by-id lookup, relative to the tag
    pub fn find_key(id: EntityId) -> String {
        format!("find_{}", id)
    }

    fn scope(&self) -> Scope {
        Scope::for_tenant(self.tenants.current_tenant())
    }

    /// Creates a record for the current tenant
    pub async fn create(&self, data: H::Attributes) -> Result<Record<H::Attributes>, DomainError> {
        self.insert(data, None).await
    }

    /// Creates a record with an initial status
    pub async fn create_with_status(
        &self,
        data: H::Attributes,
        status: impl Into<String>,
    ) -> Result<Record<H::Attributes>, DomainError> {
        self.insert(data, Some(status.into())).await
    }

    async fn insert(
        &self,
        data: H::Attributes,
        status: Option<String>,
    ) -> Result<Record<H::Attributes>, DomainError> {
        let tenant = self.tenants.current_tenant().ok_or_else(|| {
            DomainError::field_validation(
                "tenant_id",
                format!("A tenant is required to create a {}", H::ENTITY_NAME),
            )
        })?;

        let data = self.hooks.validate_before_create(data).await?;
        let data = self.hooks.prepare_data_for_create(data).await?;

        let mut record = NewRecord::new(tenant, data);
        record.status = status;

        let record = self.store.insert(record).await?;
        self.hooks.after_create(&record).await?;
        self.cache.wipe(&self.tag).await;

        info!(entity = H::ENTITY_NAME, id = %record.id, tenant = %tenant, "Entity created");
        Ok(record)
    }

    /// Applies a partial change set to a record
    ///
    /// Keys of `changes` are attribute names, plus `status` for the status
    /// column; the other record columns cannot be changed. The merged
    /// attributes are validated again before they are persisted.
    pub async fn update(
        &self,
        id: EntityId,
        changes: Map<String, Value>,
    ) -> Result<Record<H::Attributes>, DomainError> {
        let entity = self.find_or_fail(id).await?;

        let changes = self.hooks.validate_before_update(&entity, changes).await?;
        let changes = self.hooks.prepare_data_for_update(&entity, changes).await?;

        let updated = merge_changes(&entity, &changes)?;

        let persisted = self.store.update(updated).await?;
        self.hooks.after_update(&persisted, &changes).await?;
        self.cache.wipe(&self.tag).await;

        info!(entity = H::ENTITY_NAME, id = %id, fields = changes.len(), "Entity updated");

        self.store
            .find(id, &self.scope())
            .await?
            .ok_or_else(|| DomainError::not_found(H::ENTITY_NAME, id))
    }

    /// Soft-deletes a record
    pub async fn delete(&self, id: EntityId) -> Result<bool, DomainError> {
        let entity = self.find_or_fail(id).await?;

        self.hooks.validate_before_delete(&entity).await?;

        let deleted = self.store.soft_delete(id, &self.scope()).await?;
        self.hooks.after_delete(&entity).await?;
        self.cache.wipe(&self.tag).await;
        self.hooks.clear_additional_cache(&self.cache, id).await;

        info!(entity = H::ENTITY_NAME, id = %id, "Entity deleted");
        Ok(deleted)
    }

    /// Looks a record up through the cache
    ///
    /// A cached record owned by another tenant is treated as absent.
    pub async fn find_by_id(&self, id: EntityId) -> Result<Option<Record<H::Attributes>>, DomainError> {
        let scope = self.scope();
        let store = self.store.clone();

        let record = self
            .cache
            .try_tag(
                &self.tag,
                &Self::find_key(id),
                Some(self.cache_ttl()),
                || async move { store.find(id, &scope).await },
            )
            .await?;

        Ok(record.filter(|record| scope.admits(record)))
    }

    pub async fn find_or_fail(&self, id: EntityId) -> Result<Record<H::Attributes>, DomainError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found(H::ENTITY_NAME, id))
    }

    /// One page of records matching the filters, newest first
    pub async fn get_list(&self, filters: &ListFilters) -> Result<Vec<Record<H::Attributes>>, DomainError> {
        let query = self
            .build_query(filters)?
            .limit(filters.limit_or_default())
            .offset(filters.offset.unwrap_or(0));

        self.store.query(&query).await
    }

    /// Number of records matching the filters
    pub async fn get_count(&self, filters: &ListFilters) -> Result<usize, DomainError> {
        let query = self.build_query(filters)?;
        self.store.count(&query).await
    }

    /// Sets the status of several records at once
    pub async fn batch_update_status(&self, ids: &[EntityId], status: &str) -> Result<usize, DomainError> {
        let updated = self.store.update_status(ids, status, &self.scope()).await?;

        for id in ids {
            self.cache.drop_tagged(&self.tag, &Self::find_key(*id)).await;
        }
        self.cache.wipe(&self.tag).await;

        debug!(entity = H::ENTITY_NAME, requested = ids.len(), updated, status, "Batch status update");
        Ok(updated)
    }

    /// Translates list filters into a store query, without pagination
    fn build_query(&self, filters: &ListFilters) -> Result<EntityQuery, DomainError> {
        let mut query = EntityQuery::new(self.scope());

        if let Some(status) = filters.status.as_deref() {
            query = query.filter(Predicate::eq("status", status));
        }

        if let Some(keyword) = filters.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            query = self.hooks.apply_keyword_search(query, keyword);
        }

        let now = Utc::now();

        for field in self.hooks.time_fields() {
            if let Some(range) = filters.time_range(field, now)? {
                query = query.filter(Predicate::between(*field, range.start, range.end));
            }
        }

        if let Some(from) = filters.created_from_bound()? {
            query = query.filter(Predicate::since("created_at", from));
        }

        if let Some(to) = filters.created_to_bound()? {
            query = query.filter(Predicate::until("created_at", to));
        }

        if let Some(ids) = &filters.ids {
            query = query.filter(Predicate::is_in("id", ids.iter().map(|id| id.value())));
        }

        self.hooks.apply_custom_filters(query, filters)
    }
}

/// Record with `changes` merged over its status and attributes
fn merge_changes<A: Attributes>(
    entity: &Record<A>,
    changes: &Map<String, Value>,
) -> Result<Record<A>, DomainError> {
    let mut updated = entity.clone();
    let mut attributes = match serde_json::to_value(&entity.attributes) {
        Ok(Value::Object(attributes)) => attributes,
        Ok(_) => return Err(DomainError::internal("Entity attributes are not an object")),
        Err(e) => {
            return Err(DomainError::internal(format!(
                "Failed to serialize entity attributes: {}",
                e
            )))
        }
    };

    for (field, value) in changes {
        match field.as_str() {
            "status" => {
                updated.status = match value {
                    Value::Null => None,
                    Value::String(status) => Some(status.clone()),
                    _ => return Err(DomainError::field_validation("status", "Status must be a string")),
                };
            }
            column if RECORD_COLUMNS.contains(&column) => {
                return Err(DomainError::field_validation(
                    column,
                    format!("'{}' cannot be changed", column),
                ));
            }
            _ => {
                attributes.insert(field.clone(), value.clone());
            }
        }
    }

    updated.attributes = serde_json::from_value(Value::Object(attributes))
        .map_err(|e| DomainError::validation(format!("Invalid changes: {}", e)))?;
    updated.attributes.validate()?;

    Ok(updated)
}
