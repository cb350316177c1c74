use thiserror::Error;

/// Model configuration rejected at registry construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model `{model}` is declared more than once")]
    DuplicateModel { model: String },
    #[error("model `{model}`: `{name}` is not a valid identifier for {role}")]
    InvalidIdentifier {
        model: String,
        role: &'static str,
        name: String,
    },
    #[error("model `{model}` relation `{relation}` targets unknown model `{target}`")]
    UnknownTarget {
        model: String,
        relation: String,
        target: String,
    },
    #[error("model `{model}` declares relation `{relation}` more than once")]
    DuplicateRelation { model: String, relation: String },
    #[error("model `{model}` relation `{relation}` shadows the primary key")]
    RelationShadowsKey { model: String, relation: String },
    #[error("model `{model}` has a zero cache ttl")]
    ZeroTtl { model: String },
    #[error("model `{model}` is not registered")]
    UnknownModel { model: String },
}

impl ModelError {
    pub fn invalid_identifier(
        model: impl Into<String>,
        role: &'static str,
        name: impl Into<String>,
    ) -> Self {
        Self::InvalidIdentifier {
            model: model.into(),
            role,
            name: name.into(),
        }
    }

    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }
}
