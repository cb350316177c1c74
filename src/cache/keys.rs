//! Cache key definitions.
//!
//! Every tier is namespaced by model name so that a whole model can be
//! dropped at once during cascade invalidation.

use std::fmt;

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::application::pagination::PageRequest;
use crate::domain::query::{Filter, OrderBy, Projection};
use crate::domain::record::RecordId;

/// `(model, primary key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub model: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(model: impl Into<String>, id: RecordId) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

/// `(model, id, relation name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationKey {
    pub model: String,
    pub id: RecordId,
    pub relation: String,
}

impl RelationKey {
    pub fn new(model: impl Into<String>, id: RecordId, relation: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id,
            relation: relation.into(),
        }
    }
}

/// `(model, signature)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub model: String,
    pub signature: QuerySignature,
}

/// Shape of a cached query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// At most one row.
    First,
    /// Every matching row.
    Many,
    /// One page of rows plus the total.
    List,
    /// The total only.
    Count,
}

/// Hex SHA-256 over the canonical JSON form of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn compute(
        kind: QueryKind,
        filter: &Filter,
        order_by: &[OrderBy],
        select: &Projection,
        page: Option<PageRequest>,
    ) -> Self {
        // serde_json maps are key-sorted, so the encoding is stable.
        let canonical = json!({
            "kind": kind,
            "where": filter.canonical(),
            "order_by": order_by,
            "select": select,
            "page": page.map(|request| request.page()),
            "per_page": page.map(|request| request.per_page()),
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
