//! PostgreSQL entity store with connection pooling

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::entity::{
    Attributes, EntityId, EntityQuery, EntityStore, NewRecord, OrderBy, Predicate, Record, Scope,
    TenantId, RECORD_COLUMNS,
};
use crate::domain::DomainError;

const SELECT_COLUMNS: &str = "id, tenant_id, status, created_at, updated_at, deleted_at, data";

/// PostgreSQL connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/entity_cache".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Opens a pool with these settings
    pub async fn connect(&self) -> Result<PgPool, DomainError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))
    }
}

/// PostgreSQL entity store
///
/// One table per entity: the common record columns as real columns, the
/// entity attributes as a JSONB `data` column. Filters on attribute fields
/// compile to `data->>'field'` expressions.
pub struct PostgresEntityStore<A>
where
    A: Attributes,
{
    pool: PgPool,
    table_name: String,
    _phantom: PhantomData<fn() -> A>,
}

impl<A> Debug for PostgresEntityStore<A>
where
    A: Attributes,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresEntityStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl<A> PostgresEntityStore<A>
where
    A: Attributes,
{
    /// Creates a store over an existing pool
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> Result<Self, DomainError> {
        let table_name = table_name.into();

        if !is_identifier(&table_name) {
            return Err(DomainError::configuration(format!(
                "Invalid table name '{}'",
                table_name
            )));
        }

        Ok(Self {
            pool,
            table_name,
            _phantom: PhantomData,
        })
    }

    /// Connects a pool and creates the store
    pub async fn connect(
        config: &PostgresConfig,
        table_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        Self::new(config.connect().await?, table_name)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the entity table and its tenant index exist
    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                tenant_id BIGINT NOT NULL,
                status VARCHAR(64),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ,
                data JSONB NOT NULL DEFAULT '{{}}'::jsonb
            )
            "#,
            table = self.table_name
        );

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_tenant_created_idx ON {table} (tenant_id, created_at DESC)",
            table = self.table_name
        );

        for statement in [create, index] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DomainError::storage(format!("Failed to create table: {}", e)))?;
        }

        Ok(())
    }

    fn decode(row: &PgRow) -> Result<Record<A>, DomainError> {
        let column_error =
            |e: sqlx::Error| DomainError::storage(format!("Failed to read record column: {}", e));

        let data: Value = row.try_get("data").map_err(column_error)?;
        let attributes: A = serde_json::from_value(data).map_err(|e| {
            DomainError::storage(format!("Failed to deserialize record attributes: {}", e))
        })?;

        Ok(Record {
            id: EntityId::new(row.try_get("id").map_err(column_error)?),
            tenant_id: TenantId::new(row.try_get("tenant_id").map_err(column_error)?),
            status: row.try_get("status").map_err(column_error)?,
            created_at: row.try_get("created_at").map_err(column_error)?,
            updated_at: row.try_get("updated_at").map_err(column_error)?,
            deleted_at: row.try_get("deleted_at").map_err(column_error)?,
            attributes,
        })
    }

    fn encode_attributes(attributes: &A) -> Result<Value, DomainError> {
        let data = serde_json::to_value(attributes).map_err(|e| {
            DomainError::storage(format!("Failed to serialize record attributes: {}", e))
        })?;

        if !data.is_object() {
            return Err(DomainError::storage("Record attributes must serialize to an object"));
        }

        Ok(data)
    }
}

#[async_trait]
impl<A> EntityStore<A> for PostgresEntityStore<A>
where
    A: Attributes,
{
    async fn find(&self, id: EntityId, scope: &Scope) -> Result<Option<Record<A>>, DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE id = ",
            SELECT_COLUMNS, self.table_name
        ));
        builder.push_bind(id.value());
        push_scope(&mut builder, scope);

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to find record {}: {}", id, e)))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert(&self, record: NewRecord<A>) -> Result<Record<A>, DomainError> {
        let data = Self::encode_attributes(&record.attributes)?;

        let query = format!(
            "INSERT INTO {} (tenant_id, status, data) VALUES ($1, $2, $3) RETURNING {}",
            self.table_name, SELECT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(record.tenant_id.value())
            .bind(&record.status)
            .bind(&data)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to insert record: {}", e)))?;

        Self::decode(&row)
    }

    async fn update(&self, record: Record<A>) -> Result<Record<A>, DomainError> {
        let data = Self::encode_attributes(&record.attributes)?;

        let query = format!(
            r#"
            UPDATE {}
            SET status = $2, data = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            self.table_name, SELECT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(record.id.value())
            .bind(&record.status)
            .bind(&data)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::storage(format!("Failed to update record {}: {}", record.id, e))
            })?;

        match row {
            Some(row) => Self::decode(&row),
            None => Err(DomainError::not_found("record", record.id)),
        }
    }

    async fn soft_delete(&self, id: EntityId, scope: &Scope) -> Result<bool, DomainError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {} SET deleted_at = NOW() WHERE deleted_at IS NULL AND id = ",
            self.table_name
        ));
        builder.push_bind(id.value());
        push_scope(&mut builder, scope);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete record {}: {}", id, e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, query: &EntityQuery) -> Result<Vec<Record<A>>, DomainError> {
        let mut builder = select_sql(&self.table_name, query)?;

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to query records: {}", e)))?;

        rows.iter().map(Self::decode).collect()
    }

    async fn count(&self, query: &EntityQuery) -> Result<usize, DomainError> {
        let mut builder = count_sql(&self.table_name, query)?;

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to count records: {}", e)))?;

        Ok(count.max(0) as usize)
    }

    async fn update_status(
        &self,
        ids: &[EntityId],
        status: &str,
        scope: &Scope,
    ) -> Result<usize, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = ids.iter().map(EntityId::value).collect();

        let mut builder =
            QueryBuilder::<Postgres>::new(format!("UPDATE {} SET status = ", self.table_name));
        builder.push_bind(status.to_string());
        builder.push(", updated_at = NOW() WHERE id = ANY(");
        builder.push_bind(ids);
        builder.push(")");
        push_scope(&mut builder, scope);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to update statuses: {}", e)))?;

        Ok(result.rows_affected() as usize)
    }
}

/// Builds the paginated SELECT for a query
fn select_sql(table: &str, query: &EntityQuery) -> Result<QueryBuilder<'static, Postgres>, DomainError> {
    let mut builder =
        QueryBuilder::new(format!("SELECT {} FROM {} WHERE TRUE", SELECT_COLUMNS, table));

    push_scope(&mut builder, &query.scope);
    push_predicates(&mut builder, &query.predicates)?;
    push_order(&mut builder, &query.order)?;

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }

    if query.offset > 0 {
        builder.push(" OFFSET ");
        builder.push_bind(query.offset as i64);
    }

    Ok(builder)
}

/// Builds the COUNT for a query, ignoring order and pagination
fn count_sql(table: &str, query: &EntityQuery) -> Result<QueryBuilder<'static, Postgres>, DomainError> {
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} WHERE TRUE", table));

    push_scope(&mut builder, &query.scope);
    push_predicates(&mut builder, &query.predicates)?;

    Ok(builder)
}

fn push_scope(builder: &mut QueryBuilder<'static, Postgres>, scope: &Scope) {
    if let Some(tenant) = scope.tenant {
        builder.push(" AND tenant_id = ");
        builder.push_bind(tenant.value());
    }

    if !scope.with_trashed {
        builder.push(" AND deleted_at IS NULL");
    }
}

fn push_predicates(
    builder: &mut QueryBuilder<'static, Postgres>,
    predicates: &[Predicate],
) -> Result<(), DomainError> {
    for predicate in predicates {
        builder.push(" AND ");

        match predicate {
            Predicate::Eq { field, value } => {
                builder.push(text_expression(field)?);
                builder.push(" = ");
                builder.push_bind(value_text(value));
            }
            Predicate::In { field, values } => {
                if values.is_empty() {
                    builder.push("FALSE");
                    continue;
                }

                builder.push(text_expression(field)?);
                builder.push(" IN (");
                let mut separated = builder.separated(", ");
                for value in values {
                    separated.push_bind(value_text(value));
                }
                separated.push_unseparated(")");
            }
            Predicate::Range { field, from, to } => {
                let expression = time_expression(field)?;
                builder.push("TRUE");
                push_bound(builder, &expression, " >= ", *from);
                push_bound(builder, &expression, " <= ", *to);
            }
            Predicate::Search { fields, term } => {
                if fields.is_empty() {
                    builder.push("TRUE");
                    continue;
                }

                let pattern = format!("%{}%", escape_like(term));
                builder.push("(");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        builder.push(" OR ");
                    }
                    builder.push(text_expression(field)?);
                    builder.push(" ILIKE ");
                    builder.push_bind(pattern.clone());
                }
                builder.push(")");
            }
        }
    }

    Ok(())
}

fn push_bound(
    builder: &mut QueryBuilder<'static, Postgres>,
    expression: &str,
    operator: &str,
    bound: Option<DateTime<Utc>>,
) {
    if let Some(bound) = bound {
        builder.push(" AND ");
        builder.push(expression);
        builder.push(operator);
        builder.push_bind(bound);
    }
}

fn push_order(builder: &mut QueryBuilder<'static, Postgres>, order: &OrderBy) -> Result<(), DomainError> {
    let direction = if order.descending { "DESC" } else { "ASC" };
    let expression = if is_column(&order.field) {
        order.field.clone()
    } else {
        text_expression(&order.field)?
    };

    builder.push(format!(
        " ORDER BY {} {}, id {}",
        expression, direction, direction
    ));

    Ok(())
}

fn is_column(field: &str) -> bool {
    RECORD_COLUMNS.contains(&field)
}

/// Whether `name` can be spliced into SQL as a bare identifier
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }

    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn checked_field(field: &str) -> Result<&str, DomainError> {
    if is_identifier(field) {
        Ok(field)
    } else {
        Err(DomainError::field_validation(
            field,
            format!("'{}' is not a filterable field", field),
        ))
    }
}

/// Text form of a field, for equality and search
fn text_expression(field: &str) -> Result<String, DomainError> {
    let field = checked_field(field)?;

    if is_column(field) {
        Ok(format!("{}::text", field))
    } else {
        Ok(format!("data->>'{}'", field))
    }
}

/// Timestamp form of a field, for range bounds
fn time_expression(field: &str) -> Result<String, DomainError> {
    let field = checked_field(field)?;

    if is_column(field) {
        Ok(field.to_string())
    } else {
        Ok(format!("(data->>'{}')::timestamptz", field))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());

    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("invoices"));
        assert!(is_identifier("_tmp_2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("name'); DROP TABLE x; --"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_field_expressions() {
        assert_eq!(text_expression("status").unwrap(), "status::text");
        assert_eq!(text_expression("title").unwrap(), "data->>'title'");
        assert_eq!(time_expression("created_at").unwrap(), "created_at");
        assert_eq!(time_expression("due_at").unwrap(), "(data->>'due_at')::timestamptz");
        assert!(text_expression("bad field").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_select_sql() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = EntityQuery::new(Scope::tenant(TenantId::new(3)))
            .filter(Predicate::eq("status", "active"))
            .filter(Predicate::since("created_at", from))
            .filter(Predicate::search(["title", "body"], "rust"))
            .limit(20)
            .offset(40);

        let builder = select_sql("notes", &query).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT id, tenant_id, status, created_at, updated_at, deleted_at, data FROM notes \
             WHERE TRUE AND tenant_id = $1 AND deleted_at IS NULL \
             AND status::text = $2 \
             AND TRUE AND created_at >= $3 \
             AND (data->>'title' ILIKE $4 OR data->>'body' ILIKE $5) \
             ORDER BY created_at DESC, id DESC LIMIT $6 OFFSET $7"
        );
    }

    #[test]
    fn test_count_sql_ignores_pagination() {
        let query = EntityQuery::new(Scope::unscoped().with_trashed())
            .filter(Predicate::is_in("id", [1, 2]))
            .limit(5);

        let builder = count_sql("notes", &query).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM notes WHERE TRUE AND id::text IN ($1, $2)"
        );
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let query = EntityQuery::new(Scope::unscoped())
            .filter(Predicate::is_in("id", Vec::<i64>::new()));

        let builder = count_sql("notes", &query).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM notes WHERE TRUE AND deleted_at IS NULL AND FALSE"
        );
    }

    #[test]
    fn test_rejects_unsafe_field() {
        let query = EntityQuery::new(Scope::unscoped()).filter(Predicate::eq("x' OR '1'='1", 1));

        assert!(matches!(
            select_sql("notes", &query),
            Err(DomainError::Validation { .. })
        ));
    }

    // Tests below need a database:
    // DATABASE_URL=postgres://localhost/entity_cache_test cargo test -- --ignored

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, validator::Validate)]
    struct Note {
        title: String,
    }

    async fn store() -> PostgresEntityStore<Note> {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/entity_cache_test".to_string());
        let store = PostgresEntityStore::connect(&PostgresConfig::new(url), "notes_test")
            .await
            .unwrap();
        store.ensure_table().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_postgres_insert_find_delete() {
        let store = store().await;
        let scope = Scope::tenant(TenantId::new(1));

        let record = store
            .insert(NewRecord::new(
                TenantId::new(1),
                Note {
                    title: "hello".to_string(),
                },
            ))
            .await
            .unwrap();

        let found = store.find(record.id, &scope).await.unwrap().unwrap();
        assert_eq!(found.attributes.title, "hello");

        assert!(store.soft_delete(record.id, &scope).await.unwrap());
        assert!(store.find(record.id, &scope).await.unwrap().is_none());
    }
}
