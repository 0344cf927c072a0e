//! Composable record queries handed to entity stores

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::filter::parse_timestamp;
use super::record::{Record, TenantId};

/// Visibility of records for one store call
///
/// Passed explicitly on every call so tenant isolation and tombstone
/// handling are visible at each data-access site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scope {
    /// Restrict to one tenant; `None` sees every tenant
    pub tenant: Option<TenantId>,
    /// Include soft-deleted records
    pub with_trashed: bool,
}

impl Scope {
    pub fn tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            with_trashed: false,
        }
    }

    /// Every tenant, live records only
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant: Option<TenantId>) -> Self {
        Self {
            tenant,
            with_trashed: false,
        }
    }

    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    /// Whether a record is visible through this scope
    pub fn admits<A>(&self, record: &Record<A>) -> bool {
        if !self.with_trashed && record.is_trashed() {
            return false;
        }

        match self.tenant {
            Some(tenant) => record.tenant_id == tenant,
            None => true,
        }
    }
}

/// A single filter condition on a record field
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals value (compared by text, like a SQL `->>` comparison)
    Eq { field: String, value: Value },
    /// Field equals one of the values
    In { field: String, values: Vec<Value> },
    /// Timestamp field within inclusive bounds; a `None` bound is open
    Range {
        field: String,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
    /// Case-insensitive substring match on any of the fields
    Search { fields: Vec<String>, term: String },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn between(field: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::Range {
            field: field.into(),
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(field: impl Into<String>, from: DateTime<Utc>) -> Self {
        Self::Range {
            field: field.into(),
            from: Some(from),
            to: None,
        }
    }

    pub fn until(field: impl Into<String>, to: DateTime<Utc>) -> Self {
        Self::Range {
            field: field.into(),
            from: None,
            to: Some(to),
        }
    }

    pub fn search<S: Into<String>>(fields: impl IntoIterator<Item = S>, term: impl Into<String>) -> Self {
        Self::Search {
            fields: fields.into_iter().map(Into::into).collect(),
            term: term.into(),
        }
    }

    /// Evaluates the predicate against a record serialized as a JSON object
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Self::Eq { field, value } => row
                .get(field)
                .is_some_and(|actual| value_text(actual) == value_text(value)),
            Self::In { field, values } => row.get(field).is_some_and(|actual| {
                let actual = value_text(actual);
                values.iter().any(|candidate| value_text(candidate) == actual)
            }),
            Self::Range { field, from, to } => {
                let Some(at) = row.get(field).and_then(value_timestamp) else {
                    return false;
                };

                from.is_none_or(|from| from <= at) && to.is_none_or(|to| at <= to)
            }
            Self::Search { fields, term } => {
                let needle = term.to_lowercase();

                fields.iter().any(|field| {
                    row.get(field)
                        .is_some_and(|actual| value_text(actual).to_lowercase().contains(&needle))
                })
            }
        }
    }
}

/// Sort order of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Compares two serialized records; ties fall back to id in the same
    /// direction
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field))
            .then_with(|| compare_values(a.get("id"), b.get("id")));

        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        Self::desc("created_at")
    }
}

/// Filtered, ordered, paginated read against an entity store
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityQuery {
    pub scope: Scope,
    pub predicates: Vec<Predicate>,
    pub order: OrderBy,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EntityQuery {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Same filters without pagination, for counting
    pub fn unpaginated(&self) -> Self {
        Self {
            limit: None,
            offset: 0,
            ..self.clone()
        }
    }

    /// Whether every predicate holds for the serialized record
    pub fn matches(&self, row: &Value) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(row))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|raw| parse_timestamp(raw, false))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if let (Some(a), Some(b)) = (value_timestamp(a), value_timestamp(b)) {
                return a.cmp(&b);
            }

            if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            }

            value_text(a).cmp(&value_text(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn row() -> Value {
        json!({
            "id": 4,
            "tenant_id": 1,
            "status": "active",
            "name": "Quarterly Report",
            "created_at": "2024-01-15T10:00:00Z"
        })
    }

    #[test]
    fn test_eq_compares_text() {
        assert!(Predicate::eq("status", "active").matches(&row()));
        assert!(Predicate::eq("id", "4").matches(&row()));
        assert!(!Predicate::eq("status", "archived").matches(&row()));
        assert!(!Predicate::eq("missing", "x").matches(&row()));
    }

    #[test]
    fn test_in() {
        assert!(Predicate::is_in("id", [1, 4, 9]).matches(&row()));
        assert!(!Predicate::is_in("id", [1, 2]).matches(&row()));
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let exact = at("2024-01-15T10:00:00Z");

        assert!(Predicate::between("created_at", exact, exact).matches(&row()));
        assert!(Predicate::since("created_at", at("2024-01-01T00:00:00Z")).matches(&row()));
        assert!(!Predicate::until("created_at", at("2024-01-01T00:00:00Z")).matches(&row()));
        assert!(!Predicate::since("name", exact).matches(&row()));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        assert!(Predicate::search(["name"], "REPORT").matches(&row()));
        assert!(!Predicate::search(["status"], "report").matches(&row()));
    }

    #[test]
    fn test_order_by_created_desc() {
        let older = json!({"id": 1, "created_at": "2024-01-01T00:00:00Z"});
        let newer = json!({"id": 2, "created_at": "2024-01-01T00:00:00.500Z"});

        let order = OrderBy::default();
        assert_eq!(order.compare(&newer, &older), Ordering::Less);
        assert_eq!(OrderBy::asc("created_at").compare(&newer, &older), Ordering::Greater);
    }

    #[test]
    fn test_scope_admits() {
        let record = crate::domain::entity::NewRecord::new(TenantId::new(1), json!({}))
            .into_record(crate::domain::entity::EntityId::new(1), Utc::now());
        let mut trashed = record.clone();
        trashed.deleted_at = Some(Utc::now());

        assert!(Scope::tenant(TenantId::new(1)).admits(&record));
        assert!(!Scope::tenant(TenantId::new(2)).admits(&record));
        assert!(Scope::unscoped().admits(&record));
        assert!(!Scope::unscoped().admits(&trashed));
        assert!(Scope::unscoped().with_trashed().admits(&trashed));
    }

    #[test]
    fn test_unpaginated_keeps_filters() {
        let query = EntityQuery::new(Scope::unscoped())
            .filter(Predicate::eq("status", "active"))
            .limit(5)
            .offset(10);

        let counting = query.unpaginated();
        assert_eq!(counting.predicates.len(), 1);
        assert_eq!(counting.limit, None);
        assert_eq!(counting.offset, 0);
    }
}
