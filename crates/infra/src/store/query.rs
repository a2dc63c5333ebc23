//! Query parameters understood by the backing store.
//!
//! Queries are addressed by an opaque query id plus a `QueryParams` mapping.
//! Filters and ordering refer to fields of the entity's serialized (JSON) form,
//! so the same parameters can be evaluated by any store, and by the session when
//! it overlays not-yet-flushed changes.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::persistence::Record;

/// Pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Number of matching rows to skip.
    pub offset: usize,
    /// Maximum number of rows to return.
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A single predicate over one field of the serialized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Equals { field: String, value: JsonValue },
    /// SQL-style pattern where `%` matches any run of characters.
    Like { field: String, pattern: String },
    IsNull { field: String },
    IsNotNull { field: String },
    LessThan { field: String, value: JsonValue },
    LessOrEqual { field: String, value: JsonValue },
    GreaterOrEqual { field: String, value: JsonValue },
    /// Matches when at least one inner filter matches.
    AnyOf { filters: Vec<Filter> },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNotNull {
            field: field.into(),
        }
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::LessThan {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less_or_equal(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::LessOrEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_or_equal(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::GreaterOrEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::AnyOf {
            filters: filters.into_iter().collect(),
        }
    }

    /// Evaluate against the serialized entity.
    pub fn matches(&self, row: &JsonValue) -> bool {
        match self {
            Filter::Equals { field, value } => field_of(row, field) == value,
            Filter::Like { field, pattern } => field_of(row, field)
                .as_str()
                .is_some_and(|s| like_matches(s, pattern)),
            Filter::IsNull { field } => field_of(row, field).is_null(),
            Filter::IsNotNull { field } => !field_of(row, field).is_null(),
            Filter::LessThan { field, value } => {
                comparable(field_of(row, field), value) == Some(Ordering::Less)
            }
            Filter::LessOrEqual { field, value } => matches!(
                comparable(field_of(row, field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::GreaterOrEqual { field, value } => matches!(
                comparable(field_of(row, field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::AnyOf { filters } => filters.iter().any(|f| f.matches(row)),
        }
    }
}

/// Parameters of a keyed store query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// All filters must match.
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first. Ties fall back to ascending id.
    pub order_by: Vec<OrderBy>,
    pub page: Option<Pagination>,
    /// Free-form parameters for custom named queries.
    pub parameters: Map<String, JsonValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_page(mut self, page: Pagination) -> Self {
        self.page = Some(page);
        self
    }

    /// Same query without its pagination window.
    pub fn unpaged(&self) -> Self {
        Self {
            page: None,
            ..self.clone()
        }
    }

    pub fn matches(&self, row: &JsonValue) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

fn field_of<'a>(row: &'a JsonValue, field: &str) -> &'a JsonValue {
    row.get(field).unwrap_or(&JsonValue::Null)
}

/// Order two JSON scalars; `None` when they are not comparable (null or mixed types).
fn comparable(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    Some(compare_values(left, right))
}

/// Total order over JSON scalars used for sorting: null first, then booleans,
/// numbers, and strings (RFC 3339 timestamps compare chronologically).
pub fn compare_values(left: &JsonValue, right: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (left, right) {
        (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        },
        (JsonValue::String(a), JsonValue::String(b)) => {
            match (parse_timestamp(a), parse_timestamp(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        _ => rank(left).cmp(&rank(right)),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQL `LIKE` with `%` as the only wildcard.
pub fn like_matches(value: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return value == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !value.starts_with(first) || value.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &value[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Sort rows by `order_by`, then by ascending id.
pub fn sort_rows(rows: &mut [(Record, JsonValue)], order_by: &[OrderBy]) {
    rows.sort_by(|(ra, a), (rb, b)| {
        for key in order_by {
            let ord = compare_values(field_of(a, &key.field), field_of(b, &key.field));
            let ord = match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        ra.id().cmp(rb.id())
    });
}

/// Apply an optional pagination window.
pub fn paginate<T>(rows: Vec<T>, page: Option<Pagination>) -> Vec<T> {
    match page {
        Some(p) => rows.into_iter().skip(p.offset).take(p.limit).collect(),
        None => rows,
    }
}
