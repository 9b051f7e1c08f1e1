//! Declarative read-only queries over the store.
//!
//! A [`Query`] selects one entity type and narrows it with field predicates,
//! an optional relationship constraint, ordering and pagination -- the shape a
//! graph-query presentation layer needs. Rows come back as JSON objects using
//! the entity's camelCase field names, including `id`.
//!
//! Decimal-string integers (energy, love, weights) compare numerically; `0x`
//! hex strings compare case-insensitively. Ordering is numeric only when every
//! non-null value of the sorted field is a decimal; otherwise strings sort
//! lexically.
//!
//! ```
//! use aminals_store::prelude::*;
//!
//! let mut store = Store::new();
//! store.commit(vec![
//!     User::new(Address::from_low_u64(1), 10).into_record(),
//!     User::new(Address::from_low_u64(2), 20).into_record(),
//! ]);
//!
//! let query = Query::new(EntityKind::User)
//!     .filter("createdAtBlock", Predicate::Gt(serde_json::json!(15)));
//! let rows = store.query(&query).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityKind, EntityRecord};
use crate::primitives::EntityKey;
use crate::store::Store;
use crate::StoreError;

/// Page size used when a query does not set one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page a single query may request.
pub const MAX_PAGE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// A condition on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(Value),
    Not(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// Substring for string fields, membership for array fields.
    Contains(Value),
}

impl Predicate {
    fn matches(&self, field: &Value) -> bool {
        match self {
            Predicate::Eq(v) => values_equal(field, v),
            Predicate::Not(v) => !values_equal(field, v),
            Predicate::Gt(v) => compare(field, v) == Some(Ordering::Greater),
            Predicate::Gte(v) => matches!(
                compare(field, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt(v) => compare(field, v) == Some(Ordering::Less),
            Predicate::Lte(v) => {
                matches!(compare(field, v), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::In(vs) => vs.iter().any(|v| values_equal(field, v)),
            Predicate::NotIn(vs) => !vs.iter().any(|v| values_equal(field, v)),
            Predicate::Contains(v) => match (field, v) {
                (Value::Array(items), _) => items.iter().any(|item| values_equal(item, v)),
                (Value::String(s), Value::String(needle)) => {
                    s.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
                }
                _ => false,
            },
        }
    }
}

/// A predicate bound to a field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub predicate: Predicate,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Restrict results to entities whose `field` references `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationFilter {
    pub field: String,
    pub target: EntityKey,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A declarative query over one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: EntityKind,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub relation: Option<RelationFilter>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_direction: OrderDirection,
    #[serde(default = "default_first")]
    pub first: usize,
    #[serde(default)]
    pub skip: usize,
}

fn default_first() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Query {
    /// Select every entity of `kind` (first page, key order).
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            relation: None,
            order_by: None,
            order_direction: OrderDirection::Asc,
            first: DEFAULT_PAGE_SIZE,
            skip: 0,
        }
    }

    /// Add a predicate on `field`.
    pub fn filter(mut self, field: &str, predicate: Predicate) -> Self {
        self.filters.push(Filter {
            field: field.to_owned(),
            predicate,
        });
        self
    }

    /// Shorthand for an equality predicate.
    pub fn where_eq(self, field: &str, value: Value) -> Self {
        self.filter(field, Predicate::Eq(value))
    }

    /// Only entities whose `field` references `target`.
    pub fn referencing(mut self, field: &str, target: EntityKey) -> Self {
        self.relation = Some(RelationFilter {
            field: field.to_owned(),
            target,
        });
        self
    }

    /// Sort by `field`. Ties keep key order.
    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> Self {
        self.order_by = Some(field.to_owned());
        self.order_direction = direction;
        self
    }

    /// Page size.
    pub fn first(mut self, n: usize) -> Self {
        self.first = n;
        self
    }

    /// Number of leading results to skip.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl Store {
    /// Run a query and return the matching page as JSON objects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] if the page size is zero or larger
    /// than [`MAX_PAGE_SIZE`].
    pub fn query(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        if query.first == 0 || query.first > MAX_PAGE_SIZE {
            return Err(StoreError::InvalidQuery {
                details: format!(
                    "first must be between 1 and {MAX_PAGE_SIZE}, got {}",
                    query.first
                ),
            });
        }

        let candidates: Vec<&EntityRecord> = match &query.relation {
            Some(relation) => self
                .referencing_keys(query.kind, &relation.field, &relation.target)
                .into_iter()
                .filter_map(|key| self.get_record(query.kind, key))
                .collect(),
            None => self.records_of(query.kind).collect(),
        };

        let mut rows: Vec<Value> = candidates
            .into_iter()
            .map(EntityRecord::to_json)
            .filter(|row| {
                query.filters.iter().all(|f| {
                    let field = row.get(&f.field).unwrap_or(&Value::Null);
                    f.predicate.matches(field)
                })
            })
            .collect();

        if let Some(field) = &query.order_by {
            sort_rows(&mut rows, field, query.order_direction);
        }

        Ok(rows.into_iter().skip(query.skip).take(query.first).collect())
    }
}

// ---------------------------------------------------------------------------
// Value comparison
// ---------------------------------------------------------------------------

fn as_decimal(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_decimal(a), as_decimal(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            if x.starts_with("0x") && y.starts_with("0x") {
                Some(x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()))
            } else {
                Some(x.cmp(y))
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        // Nulls sort first.
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

/// Sort rows by one field under a total order.
///
/// Decimal coercion is decided once per column: pairwise it is not
/// transitive ("9" < "10" < "1a" < "9").
fn sort_rows(rows: &mut [Value], field: &str, direction: OrderDirection) {
    let numeric = rows.iter().all(|row| match row.get(field) {
        None | Some(Value::Null) => true,
        Some(v) => as_decimal(v).is_some(),
    });
    rows.sort_by(|a, b| {
        let ord = order(
            a.get(field).unwrap_or(&Value::Null),
            b.get(field).unwrap_or(&Value::Null),
            numeric,
        );
        match direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        }
    });
}

fn order(a: &Value, b: &Value, numeric: bool) -> Ordering {
    if numeric {
        if let (Some(x), Some(y)) = (as_decimal(a), as_decimal(b)) {
            return x.cmp(&y);
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => string_sort_key(x).cmp(&string_sort_key(y)),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Nulls first, then booleans, numbers, strings, and containers.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

fn string_sort_key(s: &str) -> std::borrow::Cow<'_, str> {
    if s.starts_with("0x") {
        std::borrow::Cow::Owned(s.to_ascii_lowercase())
    } else {
        std::borrow::Cow::Borrowed(s)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
