//! Store trait describing the relational persistence adapter.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::model::ModelDef;
use crate::domain::query::{Filter, OrderBy, Projection};
use crate::domain::record::{RecordId, Row};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Filtered, ordered, windowed read.
#[derive(Debug, Clone, Copy)]
pub struct FindQuery<'a> {
    pub filter: &'a Filter,
    pub order_by: &'a [OrderBy],
    pub skip: u64,
    /// `None` reads every matching row.
    pub take: Option<u64>,
    pub select: &'a Projection,
}

impl<'a> FindQuery<'a> {
    pub fn new(filter: &'a Filter, select: &'a Projection) -> Self {
        Self {
            filter,
            order_by: &[],
            skip: 0,
            take: None,
            select,
        }
    }

    pub fn ordered(mut self, order_by: &'a [OrderBy]) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn window(mut self, skip: u64, take: u64) -> Self {
        self.skip = skip;
        self.take = Some(take);
        self
    }
}

/// Relational store consumed by the cache layer.
///
/// The store is authoritative; filters passed in already include the
/// model's standing filter. Rows returned by reads contain at least the
/// projected columns plus the primary key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn count(&self, model: &ModelDef, filter: &Filter) -> Result<u64, RepoError>;

    async fn find_many(&self, model: &ModelDef, query: FindQuery<'_>)
    -> Result<Vec<Row>, RepoError>;

    async fn find_first(
        &self,
        model: &ModelDef,
        filter: &Filter,
        select: &Projection,
    ) -> Result<Option<Row>, RepoError>;

    async fn insert(&self, model: &ModelDef, data: Row) -> Result<Row, RepoError>;

    /// Update the row addressed by `key`; `RepoError::NotFound` when absent.
    async fn update_by_key(
        &self,
        model: &ModelDef,
        key: &RecordId,
        data: Row,
    ) -> Result<Row, RepoError>;
}
