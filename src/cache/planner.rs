//! Cascade invalidation planning.
//!
//! Turns a committed write into the set of cache entries that may now be
//! stale. The plan is computed from the model registry alone so it can be
//! logged and tested without touching any cache.

use std::collections::BTreeSet;
use std::fmt;

use crate::domain::model::ModelRegistry;
use crate::domain::record::RecordId;

use super::keys::RecordKey;

/// Cache entries to drop after a write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Individual records.
    pub records: BTreeSet<RecordKey>,
    /// Records whose own relation links must go.
    pub link_owners: BTreeSet<RecordKey>,
    /// Models whose whole record namespace must go.
    pub record_models: BTreeSet<String>,
    /// Models whose whole relation namespace must go.
    pub relation_models: BTreeSet<String>,
    /// Models whose query results must go.
    pub query_models: BTreeSet<String>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ records: {}, link_owners: {}, record_models: {}, \
             relation_models: {}, query_models: {} }}",
            self.records.len(),
            self.link_owners.len(),
            join(&self.record_models),
            join(&self.relation_models),
            join(&self.query_models),
        )
    }
}

fn join(models: &BTreeSet<String>) -> String {
    let names: Vec<&str> = models.iter().map(String::as_str).collect();
    format!("[{}]", names.join(","))
}

impl InvalidationPlan {
    /// Plan for a create, update or soft delete of `(model, id)`.
    ///
    /// - the record itself and the links it owns
    /// - every query over `model`
    /// - for each model declaring a relation to `model`: its queries and its
    ///   relation links; for to-many relations also its records, since the
    ///   membership of any of its rows may have changed
    pub fn for_write(registry: &ModelRegistry, model: &str, id: &RecordId) -> Self {
        let mut plan = Self::default();
        let key = RecordKey::new(model, id.clone());
        plan.records.insert(key.clone());
        plan.link_owners.insert(key);
        plan.query_models.insert(model.to_string());
        plan.cascade(registry, model);
        plan
    }

    /// Plan that drops everything cached for `model` and its dependents.
    pub fn for_model(registry: &ModelRegistry, model: &str) -> Self {
        let mut plan = Self::default();
        plan.record_models.insert(model.to_string());
        plan.relation_models.insert(model.to_string());
        plan.query_models.insert(model.to_string());
        plan.cascade(registry, model);
        plan
    }

    fn cascade(&mut self, registry: &ModelRegistry, model: &str) {
        for reference in registry.referencing(model) {
            self.query_models.insert(reference.owner.clone());
            self.relation_models.insert(reference.owner.clone());
            if reference.to_many {
                self.record_models.insert(reference.owner.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
            && self.link_owners.is_empty()
            && self.record_models.is_empty()
            && self.relation_models.is_empty()
            && self.query_models.is_empty()
    }
}
