//! List filters accepted by entity repositories

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::EntityId;
use crate::domain::DomainError;

/// Page size used when a list request names none
pub const DEFAULT_LIMIT: usize = 20;

/// Window applied when a time range only names its end
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Filters for listing and counting entities
///
/// Anything not named here lands in `extra`: `[start, end]` time ranges keyed
/// by field name and entity-specific custom filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses filters from a loosely-typed JSON object
    pub fn from_value(value: Value) -> Result<Self, DomainError> {
        serde_json::from_value(value)
            .map_err(|e| DomainError::validation(format!("Invalid list filters: {}", e)))
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_created_from(mut self, from: impl Into<String>) -> Self {
        self.created_from = Some(from.into());
        self
    }

    pub fn with_created_to(mut self, to: impl Into<String>) -> Self {
        self.created_to = Some(to.into());
        self
    }

    /// Adds a `[start, end]` range on a time field; either bound may be open
    pub fn with_time_range(
        mut self,
        field: impl Into<String>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Self {
        let bound = |b: Option<&str>| b.map_or(Value::Null, |s| Value::String(s.to_string()));
        self.extra
            .insert(field.into(), Value::Array(vec![bound(start), bound(end)]));
        self
    }

    /// Adds an entity-specific filter
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Resolves the range for `field`, if present as a two-element array
    pub fn time_range(
        &self,
        field: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeRange>, DomainError> {
        let Some(Value::Array(bounds)) = self.extra.get(field) else {
            return Ok(None);
        };

        if bounds.len() != 2 {
            return Ok(None);
        }

        let start = parse_bound(field, &bounds[0], false)?;
        let end = parse_bound(field, &bounds[1], true)?;

        Ok(TimeRange::resolve(start, end, now))
    }

    /// Lower bound from the singular `created_from` filter
    pub fn created_from_bound(&self) -> Result<Option<DateTime<Utc>>, DomainError> {
        self.created_from
            .as_deref()
            .map(|raw| {
                parse_timestamp(raw, false).ok_or_else(|| invalid_date("created_from", raw))
            })
            .transpose()
    }

    /// Upper bound from the singular `created_to` filter
    pub fn created_to_bound(&self) -> Result<Option<DateTime<Utc>>, DomainError> {
        self.created_to
            .as_deref()
            .map(|raw| parse_timestamp(raw, true).ok_or_else(|| invalid_date("created_to", raw)))
            .transpose()
    }
}

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Fills an open bound: a missing start is `end - 30 days`, a missing
    /// end is `now`
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(Self { start, end }),
            (None, Some(end)) => Some(Self {
                start: end - Duration::days(DEFAULT_RANGE_DAYS),
                end,
            }),
            (Some(start), None) => Some(Self { start, end: now }),
            (None, None) => None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Parses RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`
///
/// A bare date is the first instant of that day, or the last one when
/// `end_of_day` is set.
pub fn parse_timestamp(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&at));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::MIN
    };

    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn parse_bound(
    field: &str,
    bound: &Value,
    end_of_day: bool,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    match bound {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => parse_timestamp(s, end_of_day)
            .map(Some)
            .ok_or_else(|| invalid_date(field, s)),
        other => Err(invalid_date(field, &other.to_string())),
    }
}

fn invalid_date(field: &str, raw: &str) -> DomainError {
    DomainError::field_validation(field, format!("'{}' is not a valid date", raw))
}
