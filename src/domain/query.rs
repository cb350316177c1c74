//! Filter, ordering and projection vocabulary shared by stores and caches.
//!
//! Filters are a closed expression tree so that they can be hashed into
//! query signatures, translated to SQL and evaluated in memory with the same
//! three-valued logic a relational store applies.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::Row;

/// Row predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Matches every row.
    #[default]
    All,
    Eq {
        column: String,
        value: Value,
    },
    Ne {
        column: String,
        value: Value,
    },
    Gt {
        column: String,
        value: Value,
    },
    Gte {
        column: String,
        value: Value,
    },
    Lt {
        column: String,
        value: Value,
    },
    Lte {
        column: String,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull {
        column: String,
    },
    NotNull {
        column: String,
    },
    /// Case-insensitive substring match on text columns.
    Contains {
        column: String,
        value: String,
    },
    And {
        filters: Vec<Filter>,
    },
    Or {
        filters: Vec<Filter>,
    },
    Not {
        filter: Box<Filter>,
    },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull {
            column: column.into(),
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull {
            column: column.into(),
        }
    }

    pub fn contains(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not {
            filter: Box::new(self),
        }
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Filter) -> Self {
        Filter::And {
            filters: vec![self, other],
        }
    }

    /// Disjunction of `self` and `other`.
    pub fn or(self, other: Filter) -> Self {
        Filter::Or {
            filters: vec![self, other],
        }
    }

    pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And {
            filters: filters.into_iter().collect(),
        }
        .canonical()
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// Normal form used for hashing: nested conjunctions and disjunctions are
    /// flattened, neutral elements removed and children sorted, so that two
    /// filters that differ only in construction order compare equal.
    pub fn canonical(&self) -> Filter {
        match self {
            Filter::And { filters } => {
                let mut flat = Vec::new();
                for child in filters {
                    match child.canonical() {
                        Filter::All => {}
                        Filter::And { filters } => flat.extend(filters),
                        other => flat.push(other),
                    }
                }
                sort_and_dedup(&mut flat);
                match flat.len() {
                    0 => Filter::All,
                    1 => flat.remove(0),
                    _ => Filter::And { filters: flat },
                }
            }
            Filter::Or { filters } => {
                let mut flat = Vec::new();
                for child in filters {
                    match child.canonical() {
                        Filter::All => return Filter::All,
                        Filter::Or { filters } => flat.extend(filters),
                        other => flat.push(other),
                    }
                }
                sort_and_dedup(&mut flat);
                if flat.len() == 1 {
                    flat.remove(0)
                } else {
                    Filter::Or { filters: flat }
                }
            }
            Filter::Not { filter } => Filter::Not {
                filter: Box::new(filter.canonical()),
            },
            Filter::In { column, values } => {
                let mut values = values.clone();
                values.sort_by_key(|value| value.to_string());
                values.dedup();
                Filter::In {
                    column: column.clone(),
                    values,
                }
            }
            other => other.clone(),
        }
    }

    /// Every column the filter reads.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::All => {}
            Filter::Eq { column, .. }
            | Filter::Ne { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Gte { column, .. }
            | Filter::Lt { column, .. }
            | Filter::Lte { column, .. }
            | Filter::In { column, .. }
            | Filter::IsNull { column }
            | Filter::NotNull { column }
            | Filter::Contains { column, .. } => {
                out.insert(column.clone());
            }
            Filter::And { filters } | Filter::Or { filters } => {
                for filter in filters {
                    filter.collect_columns(out);
                }
            }
            Filter::Not { filter } => filter.collect_columns(out),
        }
    }

    /// Evaluate against an in-memory row. Missing columns read as null.
    pub fn matches(&self, row: &Row) -> bool {
        self.evaluate(row) == Some(true)
    }

    /// SQL three-valued evaluation: `None` is UNKNOWN.
    fn evaluate(&self, row: &Row) -> Option<bool> {
        let read = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Filter::All => Some(true),
            Filter::Eq { column, value } if value.is_null() => Some(read(column).is_null()),
            Filter::Ne { column, value } if value.is_null() => Some(!read(column).is_null()),
            Filter::Eq { column, value } => non_null(read(column)).map(|v| values_equal(v, value)),
            Filter::Ne { column, value } => non_null(read(column)).map(|v| !values_equal(v, value)),
            Filter::Gt { column, value } => {
                compare_values(read(column), value).map(|o| o == Ordering::Greater)
            }
            Filter::Gte { column, value } => {
                compare_values(read(column), value).map(|o| o != Ordering::Less)
            }
            Filter::Lt { column, value } => {
                compare_values(read(column), value).map(|o| o == Ordering::Less)
            }
            Filter::Lte { column, value } => {
                compare_values(read(column), value).map(|o| o != Ordering::Greater)
            }
            Filter::In { column, values } => non_null(read(column))
                .map(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Filter::IsNull { column } => Some(read(column).is_null()),
            Filter::NotNull { column } => Some(!read(column).is_null()),
            Filter::Contains { column, value } => match read(column) {
                Value::Null => None,
                Value::String(text) => {
                    Some(text.to_lowercase().contains(&value.to_lowercase()))
                }
                _ => Some(false),
            },
            Filter::And { filters } => {
                let mut unknown = false;
                for filter in filters {
                    match filter.evaluate(row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Filter::Or { filters } => {
                let mut unknown = false;
                for filter in filters {
                    match filter.evaluate(row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Filter::Not { filter } => filter.evaluate(row).map(|value| !value),
        }
    }
}

fn sort_and_dedup(filters: &mut Vec<Filter>) {
    filters.sort_by_cached_key(|filter| serde_json::to_string(filter).unwrap_or_default());
    filters.dedup();
}

fn non_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Ordering between two scalar values of the same kind; `None` when either
/// side is null or the kinds are not comparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort comparison for one column: nulls sort after every value, matching
/// the relational default of `NULLS LAST` ascending and `NULLS FIRST`
/// descending.
pub fn compare_for_sort(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            compare_values(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// Compare two rows under a multi-column ordering.
pub fn compare_rows(left: &Row, right: &Row, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ordering = compare_for_sort(left.get(&order.column), right.get(&order.column));
        let ordering = match order.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Append `column` ascending unless the ordering already mentions it, making
/// the ordering total when `column` is unique.
pub fn with_tiebreaker(order_by: &[OrderBy], column: &str) -> Vec<OrderBy> {
    let mut out = order_by.to_vec();
    if !out.iter().any(|order| order.column == column) {
        out.push(OrderBy::asc(column));
    }
    out
}

/// Which columns a read needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Every column of the row.
    #[default]
    All,
    Columns(BTreeSet<String>),
}

impl Projection {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Columns(columns.into_iter().map(Into::into).collect())
    }

    /// Ensure `column` is part of the projection.
    pub fn including(&self, column: &str) -> Self {
        match self {
            Projection::All => Projection::All,
            Projection::Columns(columns) => {
                let mut columns = columns.clone();
                columns.insert(column.to_string());
                Projection::Columns(columns)
            }
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Projection::All)
    }

    pub fn column_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Projection::All => None,
            Projection::Columns(columns) => Some(columns),
        }
    }

    /// Restrict a row to the projected columns. Requested columns absent
    /// from the row come back as null, matching `jsonb_build_object`.
    pub fn apply(&self, row: &Row) -> Row {
        match self {
            Projection::All => row.clone(),
            Projection::Columns(columns) => columns
                .iter()
                .map(|column| {
                    let value = row.get(column).cloned().unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect(),
        }
    }
}

/// `true` for names that may be interpolated into SQL as quoted identifiers.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
