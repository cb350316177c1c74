use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError, config::LoadError, domain::error::ModelError,
    infra::error::InfraError,
};

/// Flattened error chain for logging at the process boundary.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

/// A mutating or reading call was rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("model `{model}` requires an actor for mutations")]
    MissingActor { model: String },
    #[error("model `{model}` requires a primary key value")]
    MissingPrimaryKey { model: String },
    #[error("payload primary key `{found}` does not match `{expected}`")]
    PrimaryKeyMismatch { expected: String, found: String },
    #[error("model `{model}` has no soft delete column")]
    SoftDeleteUnsupported { model: String },
    #[error("model `{model}` has no relation named `{relation}`")]
    UnknownRelation { model: String, relation: String },
    #[error("`{column}` is not a valid column name")]
    InvalidColumn { column: String },
}

/// Errors surfaced by [`crate::application::crud::CrudManager`].
///
/// Store failures are passed through untouched; cache problems never appear
/// here because they degrade to a store read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrudError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl CrudError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, CrudError::Precondition(_))
    }

    pub fn store_error(&self) -> Option<&RepoError> {
        match self {
            CrudError::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// Top-level error of the `rowcache` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Crud(#[from] CrudError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
