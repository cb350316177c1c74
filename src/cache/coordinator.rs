//! Read and write paths over the record, relation and query tiers.
//!
//! Reads are cache-first with a store fallback that repopulates the tiers.
//! Writes reach the store first; only a committed write invalidates and then
//! writes the fresh row through.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{FindQuery, RepoError, Store};
use crate::domain::error::ModelError;
use crate::domain::model::{ModelDef, ModelRegistry, RelationDef, RelationKind};
use crate::domain::query::{Filter, OrderBy, Projection, with_tiebreaker};
use crate::domain::record::{RecordId, Row};

use super::config::CacheConfig;
use super::keys::{QueryKind, QuerySignature};
use super::metrics;
use super::planner::InvalidationPlan;
use super::query::{QueryCache, QueryResultSet};
use super::record::{CachedRecord, RecordCache};
use super::relation::{RelationCache, RelationLink};

/// Rows linked through a relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Related {
    One(Option<Row>),
    Many(Vec<Row>),
}

impl Related {
    fn from_rows(kind: &RelationKind, rows: Vec<Row>) -> Self {
        if kind.is_to_many() {
            Related::Many(rows)
        } else {
            Related::One(rows.into_iter().next())
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Related::One(row) => row.map(Value::Object).unwrap_or(Value::Null),
            Related::Many(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
        }
    }
}

/// Filter, ordering and projection of a list-shaped read.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    pub filter: &'a Filter,
    pub order_by: &'a [OrderBy],
    pub select: &'a Projection,
    /// `false` bypasses every tier for this call only.
    pub use_cache: bool,
}

/// Entry counts per tier, expired entries included until purged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub records: usize,
    pub relations: usize,
    pub queries: usize,
}

/// Rows of a relation found embedded in a store row.
struct Embedded {
    relation: String,
    target: String,
    to_many: bool,
    rows: Vec<Row>,
}

pub struct CacheCoordinator {
    registry: Arc<ModelRegistry>,
    config: CacheConfig,
    records: RecordCache,
    relations: RelationCache,
    queries: QueryCache,
}

impl CacheCoordinator {
    pub fn new(registry: Arc<ModelRegistry>, config: CacheConfig) -> Self {
        let capacity = config.max_entries_non_zero();
        Self {
            registry,
            config,
            records: RecordCache::new(capacity),
            relations: RelationCache::new(capacity),
            queries: QueryCache::new(capacity),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordCache {
        &self.records
    }

    pub fn relations(&self) -> &RelationCache {
        &self.relations
    }

    pub fn queries(&self) -> &QueryCache {
        &self.queries
    }

    /// Lifetime for entries of `model`, or `None` when this read must not
    /// touch the cache.
    fn ttl(&self, model: &ModelDef, use_cache: bool) -> Option<Duration> {
        if use_cache && self.config.enabled {
            model.cache_ttl()
        } else {
            None
        }
    }

    /// Single row by primary key.
    #[instrument(skip_all, fields(model = %model.name, id = %id))]
    pub async fn read_one(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        id: &RecordId,
        select: &Projection,
        use_cache: bool,
    ) -> Result<Option<Row>, RepoError> {
        let projection = select.including(&model.primary_key);
        let ttl = self.ttl(model, use_cache);

        if ttl.is_some()
            && let Some(row) = self.records.get(&model.name, id, &projection)
        {
            debug!("Record served from cache");
            return Ok(Some(row));
        }

        let filter = Filter::all_of([
            model.default_filter(),
            Filter::eq(&model.primary_key, id.to_value()),
        ]);
        let row = timed("find_first", store.find_first(model, &filter, &projection)).await?;
        Ok(row.map(|row| self.absorb(model, row, &projection, ttl)))
    }

    /// First row matching a filter under the requested ordering.
    #[instrument(skip_all, fields(model = %model.name))]
    pub async fn read_first(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        request: ReadRequest<'_>,
    ) -> Result<Option<Row>, RepoError> {
        let rows = self
            .read_ids_cached(store, model, request, QueryKind::First)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Every row matching a filter.
    #[instrument(skip_all, fields(model = %model.name))]
    pub async fn read_many(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        request: ReadRequest<'_>,
    ) -> Result<Vec<Row>, RepoError> {
        self.read_ids_cached(store, model, request, QueryKind::Many)
            .await
    }

    async fn read_ids_cached(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        request: ReadRequest<'_>,
        kind: QueryKind,
    ) -> Result<Vec<Row>, RepoError> {
        let projection = request.select.including(&model.primary_key);
        let order = with_tiebreaker(request.order_by, &model.primary_key);
        let ttl = self.ttl(model, request.use_cache);
        let signature = ttl.map(|_| {
            QuerySignature::compute(kind, request.filter, &order, &projection, None)
        });

        if let Some(signature) = &signature
            && let Some((_, rows)) = self.resolve_query(model, signature, &projection)
        {
            return Ok(rows);
        }

        let filter = Filter::all_of([model.default_filter(), request.filter.clone()]);
        let mut query = FindQuery::new(&filter, &projection).ordered(&order);
        if kind == QueryKind::First {
            query = query.window(0, 1);
        }
        let rows = timed("find_many", store.find_many(model, query)).await?;
        let rows = self.absorb_all(model, rows, &projection, ttl);

        if let (Some(ttl), Some(signature)) = (ttl, &signature)
            && let Some(ids) = ids_of(model, &rows)
        {
            self.queries
                .put(&model.name, signature, QueryResultSet::unpaged(ids), ttl);
        }
        Ok(rows)
    }

    /// One page of rows plus the filtered total.
    #[instrument(skip_all, fields(model = %model.name, page = page.page(), per_page = page.per_page()))]
    pub async fn read_page(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        request: ReadRequest<'_>,
        page: PageRequest,
    ) -> Result<Paginated<Row>, RepoError> {
        let projection = request.select.including(&model.primary_key);
        let order = with_tiebreaker(request.order_by, &model.primary_key);
        let ttl = self.ttl(model, request.use_cache);
        let signature = ttl.map(|_| {
            QuerySignature::compute(
                QueryKind::List,
                request.filter,
                &order,
                &projection,
                Some(page),
            )
        });

        if let Some(signature) = &signature
            && let Some((result, rows)) = self.resolve_query(model, signature, &projection)
        {
            return Ok(Paginated::new(rows, result.total, page));
        }

        let filter = Filter::all_of([model.default_filter(), request.filter.clone()]);
        let total = timed("count", store.count(model, &filter)).await?;
        let query = FindQuery::new(&filter, &projection)
            .ordered(&order)
            .window(page.offset(), page.limit());
        let rows = timed("find_many", store.find_many(model, query)).await?;
        let rows = self.absorb_all(model, rows, &projection, ttl);

        if let (Some(ttl), Some(signature)) = (ttl, &signature)
            && let Some(ids) = ids_of(model, &rows)
        {
            self.queries.put(
                &model.name,
                signature,
                QueryResultSet::page(ids, total, page),
                ttl,
            );
        }
        Ok(Paginated::new(rows, total, page))
    }

    /// Number of rows matching a filter.
    #[instrument(skip_all, fields(model = %model.name))]
    pub async fn count(
        &self,
        store: &dyn Store,
        model: &ModelDef,
        filter: &Filter,
        use_cache: bool,
    ) -> Result<u64, RepoError> {
        let ttl = self.ttl(model, use_cache);
        let signature = ttl.map(|_| {
            QuerySignature::compute(QueryKind::Count, filter, &[], &Projection::All, None)
        });

        if let Some(signature) = &signature
            && let Some(result) = self.queries.get(&model.name, signature)
        {
            return Ok(result.total);
        }

        let effective = Filter::all_of([model.default_filter(), filter.clone()]);
        let total = timed("count", store.count(model, &effective)).await?;
        if let (Some(ttl), Some(signature)) = (ttl, &signature) {
            self.queries
                .put(&model.name, signature, QueryResultSet::count(total), ttl);
        }
        Ok(total)
    }

    /// Rows linked to `(owner, id)` through `relation`.
    ///
    /// Returns `None` when the owning row does not exist or is excluded by
    /// its standing filter.
    #[instrument(skip_all, fields(model = %owner.name, id = %id, relation = %relation.name))]
    pub async fn read_relation(
        &self,
        store: &dyn Store,
        owner: &ModelDef,
        id: &RecordId,
        relation: &RelationDef,
        select: &Projection,
        use_cache: bool,
    ) -> Result<Option<Related>, RepoError> {
        let target = self
            .registry
            .get(&relation.target)
            .ok_or_else(|| RepoError::invalid_input(format!("unknown model `{}`", relation.target)))?;
        let projection = select.including(&target.primary_key);
        let link_ttl = self.ttl(owner, use_cache);
        let target_ttl = self.ttl(target, use_cache);
        let cache_links = link_ttl.is_some() && target_ttl.is_some();

        if cache_links
            && let Some(link) = self.relations.get_link(&owner.name, id, &relation.name)
        {
            if let Some(rows) = self.resolve_ids(&target.name, link.ids(), &projection) {
                debug!(linked = rows.len(), "Relation served from cache");
                return Ok(Some(Related::from_rows(&relation.kind, rows)));
            }
            debug!("Cached relation link has unresolved records");
        }

        let local_key = relation.kind.local_key();
        let owner_projection = Projection::columns([local_key]);
        let Some(owner_row) = self
            .read_one(store, owner, id, &owner_projection, use_cache)
            .await?
        else {
            return Ok(None);
        };

        let local_value = owner_row.get(local_key).cloned().unwrap_or(Value::Null);
        let rows = if local_value.is_null() {
            Vec::new()
        } else {
            let filter = Filter::all_of([
                target.default_filter(),
                Filter::eq(relation.kind.target_key(), local_value),
            ]);
            let order = with_tiebreaker(relation.kind.order_by(), &target.primary_key);
            let mut query = FindQuery::new(&filter, &projection).ordered(&order);
            if !relation.kind.is_to_many() {
                query = query.window(0, 1);
            }
            timed("find_many", store.find_many(target, query)).await?
        };
        let rows = self.absorb_all(target, rows, &projection, target_ttl);

        if cache_links
            && let Some(ttl) = link_ttl
            && let Some(ids) = ids_of(target, &rows)
        {
            let link = if relation.kind.is_to_many() {
                RelationLink::Many(ids)
            } else {
                RelationLink::One(ids.into_iter().next())
            };
            self.relations
                .put_link(&owner.name, id, &relation.name, link, ttl);
        }

        Ok(Some(Related::from_rows(&relation.kind, rows)))
    }

    /// Run a store write and, only if it commits, cascade invalidation and
    /// write the fresh row through.
    pub async fn commit_write<F>(
        &self,
        model: &ModelDef,
        op: &'static str,
        key: Option<&RecordId>,
        write: F,
    ) -> Result<Row, RepoError>
    where
        F: Future<Output = Result<Row, RepoError>>,
    {
        let row = timed(op, write).await?;
        let (row, _) = self.strip_relations(model, row);
        if !self.config.enabled {
            return Ok(row);
        }

        let id = RecordId::from_row(&row, &model.primary_key).or_else(|| key.cloned());
        let plan = match &id {
            Some(id) => InvalidationPlan::for_write(&self.registry, &model.name, id),
            None => InvalidationPlan::for_model(&self.registry, &model.name),
        };
        self.apply(&plan);
        info!(model = %model.name, op, %plan, "Write committed; cache invalidated");

        // A custom scope is evaluated by the store with its column types, which
        // in-memory matching cannot reproduce; scoped rows are left to the next read.
        if let (Some(id), Some(ttl)) = (&id, model.cache_ttl())
            && model.default_scope.is_all()
            && model.default_filter().matches(&row)
        {
            self.records
                .put(&model.name, id, CachedRecord::complete(row.clone()), ttl);
        }
        Ok(row)
    }

    /// Drop everything cached for `model` and for models relating to it.
    pub fn invalidate_model(&self, model: &str) -> Result<InvalidationPlan, ModelError> {
        self.registry.require(model)?;
        let plan = InvalidationPlan::for_model(&self.registry, model);
        self.apply(&plan);
        info!(model, %plan, "Model cache invalidated");
        Ok(plan)
    }

    pub fn apply(&self, plan: &InvalidationPlan) {
        for key in &plan.records {
            self.records.invalidate(&key.model, &key.id);
        }
        for key in &plan.link_owners {
            self.relations.invalidate_owner(&key.model, &key.id);
        }
        for model in &plan.record_models {
            self.records.invalidate_model(model);
        }
        for model in &plan.relation_models {
            self.relations.invalidate_model(model);
        }
        for model in &plan.query_models {
            self.queries.invalidate_model(model);
        }
    }

    pub fn clear(&self) {
        self.records.clear();
        self.relations.clear();
        self.queries.clear();
    }

    /// Drop expired entries from every tier. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        self.records.purge_expired() + self.relations.purge_expired() + self.queries.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            records: self.records.len(),
            relations: self.relations.len(),
            queries: self.queries.len(),
        }
    }

    /// Resolve a cached query result into rows. Any unresolved record turns
    /// the whole call into a miss and drops the query entry, leaving the
    /// records themselves alone.
    fn resolve_query(
        &self,
        model: &ModelDef,
        signature: &QuerySignature,
        projection: &Projection,
    ) -> Option<(QueryResultSet, Vec<Row>)> {
        let result = self.queries.get(&model.name, signature)?;
        match self.resolve_ids(&model.name, &result.ids, projection) {
            Some(rows) => {
                debug!(rows = rows.len(), "Query served from cache");
                Some((result, rows))
            }
            None => {
                debug!(%signature, "Cached query has unresolved records");
                self.queries.invalidate(&model.name, signature);
                None
            }
        }
    }

    fn resolve_ids(&self, model: &str, ids: &[RecordId], projection: &Projection) -> Option<Vec<Row>> {
        ids.iter()
            .map(|id| self.records.get(model, id, projection))
            .collect()
    }

    fn absorb_all(
        &self,
        model: &ModelDef,
        rows: Vec<Row>,
        projection: &Projection,
        ttl: Option<Duration>,
    ) -> Vec<Row> {
        rows.into_iter()
            .map(|row| self.absorb(model, row, projection, ttl))
            .collect()
    }

    /// Strip embedded relations from a store row and, when `ttl` is set,
    /// cache the row, the embedded rows and their links.
    ///
    /// Projected rows come back in the shape a cache hit would return.
    fn absorb(&self, model: &ModelDef, row: Row, projection: &Projection, ttl: Option<Duration>) -> Row {
        let (row, embedded) = self.strip_relations(model, row);
        let row = match projection {
            Projection::All => row,
            Projection::Columns(_) => projection.apply(&row),
        };
        let Some(ttl) = ttl else {
            return row;
        };
        let Some(id) = RecordId::from_row(&row, &model.primary_key) else {
            return row;
        };

        self.records.put(
            &model.name,
            &id,
            CachedRecord::from_read(row.clone(), projection),
            ttl,
        );

        for Embedded {
            relation,
            target,
            to_many,
            rows,
        } in embedded
        {
            let Some(target) = self.registry.get(&target) else {
                continue;
            };
            let Some(target_ttl) = self.ttl(target, true) else {
                continue;
            };
            let filter = target.default_filter();
            let mut ids = Vec::with_capacity(rows.len());
            for linked in rows.into_iter().filter(|linked| filter.matches(linked)) {
                let columns = Projection::columns(linked.keys().cloned());
                let linked = self.absorb(target, linked, &columns, Some(target_ttl));
                if let Some(linked_id) = RecordId::from_row(&linked, &target.primary_key) {
                    ids.push(linked_id);
                }
            }
            let link = if to_many {
                RelationLink::Many(ids)
            } else {
                RelationLink::One(ids.into_iter().next())
            };
            self.relations.put_link(&model.name, &id, &relation, link, ttl);
        }
        row
    }

    /// Separate relation objects a store embedded under relation names.
    fn strip_relations(&self, model: &ModelDef, mut row: Row) -> (Row, Vec<Embedded>) {
        let mut embedded = Vec::new();
        for relation in &model.relations {
            let is_embedded = match (row.get(&relation.name), &relation.kind) {
                (Some(Value::Object(_)), RelationKind::ToOne { .. }) => true,
                (Some(Value::Array(items)), RelationKind::ToMany { .. }) => {
                    items.iter().all(Value::is_object)
                }
                _ => false,
            };
            if !is_embedded {
                continue;
            }
            let rows = match row.remove(&relation.name) {
                Some(Value::Object(object)) => vec![object],
                Some(Value::Array(items)) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(object) => Some(object),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            embedded.push(Embedded {
                relation: relation.name.clone(),
                target: relation.target.clone(),
                to_many: relation.kind.is_to_many(),
                rows,
            });
        }
        (row, embedded)
    }
}

/// Primary keys of `rows`, or `None` if any row lacks one.
fn ids_of(model: &ModelDef, rows: &[Row]) -> Option<Vec<RecordId>> {
    rows.iter()
        .map(|row| RecordId::from_row(row, &model.primary_key))
        .collect()
}

async fn timed<T>(
    op: &'static str,
    call: impl Future<Output = Result<T, RepoError>>,
) -> Result<T, RepoError> {
    let started_at = Instant::now();
    let result = call.await;
    metrics::store_latency(op, started_at.elapsed().as_secs_f64() * 1000.0);
    if let Err(err) = &result {
        debug!(op, error = %err, "Store call failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::model::RelationDef;
    use crate::infra::memory::MemoryStore;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("object literal")
    }

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::new(vec![
                ModelDef::new("users")
                    .with_cache_ttl(TTL)
                    .with_relation(RelationDef::to_many("posts", "posts", "id", "author_id")),
                ModelDef::new("posts")
                    .with_cache_ttl(TTL)
                    .with_relation(RelationDef::to_one("author", "users", "author_id", "id")),
            ])
            .expect("valid models"),
        )
    }

    fn model(coordinator: &CacheCoordinator, name: &str) -> Arc<ModelDef> {
        coordinator
            .registry()
            .get(name)
            .cloned()
            .expect("registered model")
    }

    #[tokio::test]
    async fn embedded_relations_are_cached_separately() {
        let coordinator = CacheCoordinator::new(registry(), CacheConfig::default());
        let posts = model(&coordinator, "posts");
        let stored = row(json!({
            "id": 10,
            "title": "hello",
            "author_id": 1,
            "author": {"id": 1, "name": "ada"}
        }));

        let cleaned = coordinator.absorb(&posts, stored, &Projection::All, Some(TTL));
        assert!(!cleaned.contains_key("author"));

        let post = coordinator
            .records()
            .peek("posts", &RecordId::Int(10))
            .expect("post cached");
        assert!(!post.data().contains_key("author"));

        let author = coordinator
            .records()
            .get("users", &RecordId::Int(1), &Projection::columns(["name"]))
            .expect("author cached under its own model");
        assert_eq!(author["name"], json!("ada"));

        assert_eq!(
            coordinator
                .relations()
                .get_link("posts", &RecordId::Int(10), "author"),
            Some(RelationLink::One(Some(RecordId::Int(1))))
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let coordinator = CacheCoordinator::new(registry(), CacheConfig::default());
        let users = model(&coordinator, "users");
        coordinator.records().put(
            "users",
            &RecordId::Int(1),
            CachedRecord::complete(row(json!({"id": 1, "name": "a"}))),
            TTL,
        );
        let before = coordinator.records().peek("users", &RecordId::Int(1));

        let result = coordinator
            .commit_write(&users, "update", Some(&RecordId::Int(1)), async {
                Err(RepoError::Timeout)
            })
            .await;
        assert_eq!(result, Err(RepoError::Timeout));
        assert_eq!(coordinator.records().peek("users", &RecordId::Int(1)), before);
    }

    #[tokio::test]
    async fn committed_rows_are_written_through() {
        let coordinator = CacheCoordinator::new(registry(), CacheConfig::default());
        let users = model(&coordinator, "users");

        coordinator
            .commit_write(&users, "update", Some(&RecordId::Int(1)), async {
                Ok(row(json!({"id": 1, "name": "a", "deleted_at": null})))
            })
            .await
            .expect("write");
        let cached = coordinator
            .records()
            .peek("users", &RecordId::Int(1))
            .expect("written through");
        assert!(cached.is_complete());
    }

    #[tokio::test]
    async fn scoped_models_skip_write_through() {
        let registry = Arc::new(
            ModelRegistry::new(vec![
                ModelDef::new("accounts")
                    .with_cache_ttl(TTL)
                    .with_scope(Filter::ne("status", "1")),
            ])
            .expect("valid models"),
        );
        let coordinator = CacheCoordinator::new(registry, CacheConfig::default());
        let accounts = model(&coordinator, "accounts");

        // The store compares `status` as an integer column; only it can decide scope.
        let written = coordinator
            .commit_write(&accounts, "update", Some(&RecordId::Int(1)), async {
                Ok(row(json!({"id": 1, "status": 1, "deleted_at": null})))
            })
            .await
            .expect("write");
        assert_eq!(written["status"], json!(1));
        assert!(coordinator.records().peek("accounts", &RecordId::Int(1)).is_none());
    }

    #[tokio::test]
    async fn disabled_cache_passes_through() {
        let coordinator = CacheCoordinator::new(registry(), CacheConfig::disabled());
        let users = model(&coordinator, "users");
        let store = MemoryStore::new();
        store.seed("users", [row(json!({"id": 1, "name": "a", "deleted_at": null}))]);

        for _ in 0..2 {
            let found = coordinator
                .read_one(&store, &users, &RecordId::Int(1), &Projection::All, true)
                .await
                .expect("read");
            assert!(found.is_some());
        }
        assert_eq!(store.calls().find_first, 2);
        assert_eq!(coordinator.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn invalidate_model_rejects_unknown_names() {
        let coordinator = CacheCoordinator::new(registry(), CacheConfig::default());
        assert!(coordinator.invalidate_model("nope").is_err());
        let plan = coordinator.invalidate_model("users").expect("known model");
        assert!(plan.query_models.contains("posts"));
    }
}
