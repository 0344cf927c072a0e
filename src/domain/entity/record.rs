//! Tenant-scoped entity records

use std::fmt::{self, Debug};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use validator::Validate;

/// Integer primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the customer/organization owning a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity-specific payload carried by a [`Record`]
///
/// Must serialize as a JSON object; its fields sit next to the record
/// columns when serialized, so it must not reuse their names.
pub trait Attributes:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + Validate + 'static
{
}

impl<T> Attributes for T where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + Validate + 'static
{
}

/// Names of the columns every record carries
pub const RECORD_COLUMNS: [&str; 6] = [
    "id",
    "tenant_id",
    "status",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// A persisted entity: common columns plus its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "A: Serialize + DeserializeOwned")]
pub struct Record<A> {
    pub id: EntityId,
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub attributes: A,
}

impl<A> Record<A> {
    /// Whether the record has been soft-deleted
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A record about to be inserted; the store assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewRecord<A> {
    pub tenant_id: TenantId,
    pub status: Option<String>,
    pub attributes: A,
}

impl<A> NewRecord<A> {
    pub fn new(tenant_id: TenantId, attributes: A) -> Self {
        Self {
            tenant_id,
            status: None,
            attributes,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Materializes the record with the given id at time `now`
    pub fn into_record(self, id: EntityId, now: DateTime<Utc>) -> Record<A> {
        Record {
            id,
            tenant_id: self.tenant_id,
            status: self.status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            attributes: self.attributes,
        }
    }
}
