//! Model definitions and the startup-validated model registry.
//!
//! A model describes one table: its primary key, the standing filter every
//! read applies, optional cache settings and the relations it declares.
//! Relations are a closed union validated once when the registry is built.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::ModelError;
use super::query::{Filter, OrderBy, is_sql_identifier};

const DEFAULT_PRIMARY_KEY: &str = "id";
const DEFAULT_SOFT_DELETE_COLUMN: &str = "deleted_at";

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_soft_delete_column() -> Option<String> {
    Some(DEFAULT_SOFT_DELETE_COLUMN.to_string())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|column| !column.trim().is_empty()))
}

/// Per-model cache settings. A model without them is never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCacheSettings {
    pub ttl_seconds: u64,
}

impl ModelCacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Columns stamped on writes. `None` disables a stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditColumns {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_by: Option<String>,
    /// Reject mutations issued without an actor.
    pub require_actor: bool,
}

impl Default for AuditColumns {
    fn default() -> Self {
        Self {
            created_at: Some("created_at".to_string()),
            updated_at: Some("updated_at".to_string()),
            created_by: Some("created_by".to_string()),
            updated_by: Some("updated_by".to_string()),
            deleted_by: None,
            require_actor: true,
        }
    }
}

impl AuditColumns {
    /// No stamping and no actor requirement.
    pub fn none() -> Self {
        Self {
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
            deleted_by: None,
            require_actor: false,
        }
    }

    fn columns(&self) -> impl Iterator<Item = &String> {
        [
            &self.created_at,
            &self.updated_at,
            &self.created_by,
            &self.updated_by,
            &self.deleted_by,
        ]
        .into_iter()
        .flatten()
    }
}

/// Relation cardinality and join keys.
///
/// Linked rows are the target rows whose `target_key` equals the owner's
/// `local_key`. A belongs-to link is `ToOne { local_key: <fk>, target_key: <pk> }`,
/// a has-many link is `ToMany { local_key: <pk>, target_key: <fk> }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    ToOne {
        local_key: String,
        target_key: String,
    },
    ToMany {
        local_key: String,
        target_key: String,
        #[serde(default)]
        order_by: Vec<OrderBy>,
    },
}

impl RelationKind {
    pub fn local_key(&self) -> &str {
        match self {
            RelationKind::ToOne { local_key, .. } | RelationKind::ToMany { local_key, .. } => {
                local_key
            }
        }
    }

    pub fn target_key(&self) -> &str {
        match self {
            RelationKind::ToOne { target_key, .. } | RelationKind::ToMany { target_key, .. } => {
                target_key
            }
        }
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::ToMany { .. })
    }

    pub fn order_by(&self) -> &[OrderBy] {
        match self {
            RelationKind::ToOne { .. } => &[],
            RelationKind::ToMany { order_by, .. } => order_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::ToOne {
                local_key: local_key.into(),
                target_key: target_key.into(),
            },
        }
    }

    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::ToMany {
                local_key: local_key.into(),
                target_key: target_key.into(),
                order_by: Vec::new(),
            },
        }
    }

    /// Set the ordering of a to-many relation; ignored for to-one relations.
    pub fn ordered_by(mut self, order: Vec<OrderBy>) -> Self {
        if let RelationKind::ToMany { order_by, .. } = &mut self.kind {
            *order_by = order;
        }
        self
    }
}

/// Description of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    /// Table name; defaults to the model name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Tombstone column; `None` (an empty string in configuration files)
    /// disables soft delete for the model.
    #[serde(
        default = "default_soft_delete_column",
        deserialize_with = "empty_as_none"
    )]
    pub soft_delete_column: Option<String>,
    /// Model-specific standing filter, in addition to the tombstone check.
    #[serde(default)]
    pub default_scope: Filter,
    #[serde(default)]
    pub cache: Option<ModelCacheSettings>,
    #[serde(default)]
    pub audit: AuditColumns,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: default_primary_key(),
            soft_delete_column: default_soft_delete_column(),
            default_scope: Filter::All,
            cache: None,
            audit: AuditColumns::default(),
            relations: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn with_soft_delete(mut self, column: Option<&str>) -> Self {
        self.soft_delete_column = column.map(str::to_string);
        self
    }

    pub fn with_scope(mut self, scope: Filter) -> Self {
        self.default_scope = scope;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Some(ModelCacheSettings {
            ttl_seconds: ttl.as_secs(),
        });
        self
    }

    pub fn with_audit(mut self, audit: AuditColumns) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Cache lifetime, or `None` when the model is not cached.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache.map(|settings| settings.ttl())
    }

    /// Standing filter applied to every read: not tombstoned and in scope.
    pub fn default_filter(&self) -> Filter {
        let tombstone = self
            .soft_delete_column
            .as_ref()
            .map(Filter::is_null)
            .unwrap_or(Filter::All);
        Filter::all_of([tombstone, self.default_scope.clone()])
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let check = |role: &'static str, name: &str| {
            if is_sql_identifier(name) {
                Ok(())
            } else {
                Err(ModelError::invalid_identifier(&self.name, role, name))
            }
        };

        check("table", self.table_name())?;
        check("primary key", &self.primary_key)?;
        if let Some(column) = &self.soft_delete_column {
            check("soft delete column", column)?;
        }
        for column in self.audit.columns() {
            check("audit column", column)?;
        }
        for column in self.default_scope.columns() {
            check("default scope column", &column)?;
        }
        if self.cache.is_some_and(|settings| settings.ttl_seconds == 0) {
            return Err(ModelError::ZeroTtl {
                model: self.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for relation in &self.relations {
            if relation.name.trim().is_empty() {
                return Err(ModelError::invalid_identifier(
                    &self.name,
                    "relation name",
                    &relation.name,
                ));
            }
            if !seen.insert(relation.name.as_str()) {
                return Err(ModelError::DuplicateRelation {
                    model: self.name.clone(),
                    relation: relation.name.clone(),
                });
            }
            if relation.name == self.primary_key {
                return Err(ModelError::RelationShadowsKey {
                    model: self.name.clone(),
                    relation: relation.name.clone(),
                });
            }
            check("relation local key", relation.kind.local_key())?;
            check("relation target key", relation.kind.target_key())?;
            for order in relation.kind.order_by() {
                check("relation order column", &order.column)?;
            }
        }
        Ok(())
    }
}

/// A relation declared by `owner` that points at some other model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub owner: String,
    pub relation: String,
    pub to_many: bool,
}

/// Validated set of models with a reverse relation index.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelDef>>,
    referencing: BTreeMap<String, Vec<RelationRef>>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelDef>) -> Result<Self, ModelError> {
        let mut registry = Self::default();
        for model in models {
            model.validate()?;
            if registry.models.contains_key(&model.name) {
                return Err(ModelError::DuplicateModel { model: model.name });
            }
            registry.models.insert(model.name.clone(), Arc::new(model));
        }

        for model in registry.models.values() {
            for relation in &model.relations {
                if !registry.models.contains_key(&relation.target) {
                    return Err(ModelError::UnknownTarget {
                        model: model.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
                registry
                    .referencing
                    .entry(relation.target.clone())
                    .or_default()
                    .push(RelationRef {
                        owner: model.name.clone(),
                        relation: relation.name.clone(),
                        to_many: relation.kind.is_to_many(),
                    });
            }
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelDef>> {
        self.models.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<ModelDef>, ModelError> {
        self.get(name).ok_or_else(|| ModelError::unknown_model(name))
    }

    /// Relations in other models (or this one) that target `name`.
    pub fn referencing(&self, name: &str) -> &[RelationRef] {
        self.referencing
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> Vec<ModelDef> {
        vec![
            ModelDef::new("users")
                .with_relation(RelationDef::to_many("posts", "posts", "id", "author_id")),
            ModelDef::new("posts")
                .with_relation(RelationDef::to_one("author", "users", "author_id", "id")),
        ]
    }

    #[test]
    fn registry_builds_reverse_index() {
        let registry = ModelRegistry::new(blog()).expect("valid models");
        let refs = registry.referencing("users");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].owner, "posts");
        assert!(!refs[0].to_many);

        let refs = registry.referencing("posts");
        assert_eq!(refs[0].owner, "users");
        assert!(refs[0].to_many);
        assert!(registry.referencing("tags").is_empty());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let models = vec![
            ModelDef::new("posts")
                .with_relation(RelationDef::to_one("author", "people", "author_id", "id")),
        ];
        let err = ModelRegistry::new(models).expect_err("unknown target");
        assert!(matches!(err, ModelError::UnknownTarget { target, .. } if target == "people"));
    }

    #[test]
    fn duplicate_models_are_rejected() {
        let err = ModelRegistry::new(vec![ModelDef::new("a"), ModelDef::new("a")])
            .expect_err("duplicate");
        assert_eq!(
            err,
            ModelError::DuplicateModel {
                model: "a".to_string()
            }
        );
    }

    #[test]
    fn duplicate_relations_are_rejected() {
        let model = ModelDef::new("users")
            .with_relation(RelationDef::to_many("posts", "users", "id", "x"))
            .with_relation(RelationDef::to_many("posts", "users", "id", "y"));
        let err = ModelRegistry::new(vec![model]).expect_err("duplicate relation");
        assert!(matches!(err, ModelError::DuplicateRelation { .. }));
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        let model = ModelDef::new("users").with_table("users; drop table x");
        let err = ModelRegistry::new(vec![model]).expect_err("bad table");
        assert!(matches!(err, ModelError::InvalidIdentifier { role: "table", .. }));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let model = ModelDef::new("users").with_cache_ttl(Duration::from_millis(10));
        let err = ModelRegistry::new(vec![model]).expect_err("zero ttl");
        assert!(matches!(err, ModelError::ZeroTtl { .. }));
    }

    #[test]
    fn default_filter_combines_tombstone_and_scope() {
        let model = ModelDef::new("users").with_scope(Filter::eq("tenant", 1));
        assert_eq!(
            model.default_filter(),
            Filter::all_of([Filter::is_null("deleted_at"), Filter::eq("tenant", 1)])
        );

        let plain = ModelDef::new("logs").with_soft_delete(None);
        assert_eq!(plain.default_filter(), Filter::All);
    }

    #[test]
    fn relation_defs_deserialize_from_flat_tables() {
        let relation: RelationDef = serde_json::from_value(serde_json::json!({
            "name": "posts",
            "target": "posts",
            "kind": "to_many",
            "local_key": "id",
            "target_key": "author_id",
            "order_by": [{"column": "created_at", "direction": "desc"}]
        }))
        .expect("relation");
        assert!(relation.kind.is_to_many());
        assert_eq!(relation.kind.order_by(), &[OrderBy::desc("created_at")]);
    }

    #[test]
    fn empty_soft_delete_column_disables_soft_delete() {
        let model: ModelDef = serde_json::from_value(serde_json::json!({
            "name": "logs",
            "soft_delete_column": ""
        }))
        .expect("model");
        assert_eq!(model.soft_delete_column, None);

        let model: ModelDef =
            serde_json::from_value(serde_json::json!({"name": "users"})).expect("model");
        assert_eq!(model.soft_delete_column.as_deref(), Some("deleted_at"));
    }
}
