//! Record identifiers and row payloads exchanged with the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single row as returned by the store: column name to value.
///
/// The map is key-ordered, which keeps projections and hashes deterministic.
pub type Row = serde_json::Map<String, Value>;

/// Primary key value of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Extract an identifier from a column value.
    ///
    /// Returns `None` for null, floating point, boolean and structured values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(RecordId::Int),
            Value::String(text) => Some(RecordId::Text(text.clone())),
            _ => None,
        }
    }

    /// Read the identifier stored under `column` in `row`.
    pub fn from_row(row: &Row, column: &str) -> Option<Self> {
        row.get(column).and_then(Self::from_value)
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(value) => Value::from(*value),
            RecordId::Text(value) => Value::String(value.clone()),
        }
    }

    /// An empty text key cannot address a row.
    pub fn is_blank(&self) -> bool {
        matches!(self, RecordId::Text(text) if text.trim().is_empty())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(value) => write!(f, "{value}"),
            RecordId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        RecordId::Int(value.into())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Parse a command-line style identifier: integers become `Int`, everything else `Text`.
impl std::str::FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(value) => RecordId::Int(value),
            Err(_) => RecordId::Text(s.to_string()),
        })
    }
}
