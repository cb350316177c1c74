//! Public CRUD operations for one model.
//!
//! Every read applies the model's default filter and goes through the cache
//! coordinator; every write checks its preconditions before the store is
//! touched and invalidates through the coordinator only once it commits.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument};

use crate::application::error::{CrudError, PreconditionError};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{RepoError, Store};
use crate::cache::{CacheCoordinator, ReadRequest};
use crate::domain::error::ModelError;
use crate::domain::model::ModelDef;
use crate::domain::query::{Filter, OrderBy, Projection, is_sql_identifier};
use crate::domain::record::{RecordId, Row};

pub use crate::cache::Related;

/// How `find_one` locates its row.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Id(RecordId),
    Filter(Filter),
}

impl From<RecordId> for Lookup {
    fn from(id: RecordId) -> Self {
        Lookup::Id(id)
    }
}

impl From<Filter> for Lookup {
    fn from(filter: Filter) -> Self {
        Lookup::Filter(filter)
    }
}

/// Per-call read options.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    /// `false` skips every cache tier for this call only.
    pub use_cache: bool,
    pub select: Projection,
    pub order_by: Vec<OrderBy>,
    /// Relations attached to each returned row under the relation's name.
    pub include: Vec<String>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            select: Projection::All,
            order_by: Vec::new(),
            include: Vec::new(),
        }
    }
}

impl FindOptions {
    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Projection::columns(columns);
        self
    }

    pub fn order_by(mut self, order_by: impl IntoIterator<Item = OrderBy>) -> Self {
        self.order_by = order_by.into_iter().collect();
        self
    }

    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include.push(relation.into());
        self
    }
}

/// Who is performing a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    pub actor: Option<String>,
}

impl WriteContext {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct CrudManager {
    model: Arc<ModelDef>,
    store: Arc<dyn Store>,
    coordinator: Arc<CacheCoordinator>,
}

impl CrudManager {
    pub fn new(
        model: &str,
        store: Arc<dyn Store>,
        coordinator: Arc<CacheCoordinator>,
    ) -> Result<Self, ModelError> {
        let model = coordinator.registry().require(model)?.clone();
        Ok(Self {
            model,
            store,
            coordinator,
        })
    }

    pub fn model(&self) -> &ModelDef {
        &self.model
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// A single row by id or by filter, or `None` when nothing in scope matches.
    pub async fn find_one(
        &self,
        lookup: impl Into<Lookup>,
        options: &FindOptions,
    ) -> Result<Option<Row>, CrudError> {
        self.check_options(options)?;
        let row = match lookup.into() {
            Lookup::Id(id) => {
                self.require_id(&id)?;
                self.coordinator
                    .read_one(
                        self.store.as_ref(),
                        &self.model,
                        &id,
                        &options.select,
                        options.use_cache,
                    )
                    .await?
            }
            Lookup::Filter(filter) => {
                self.check_filter(&filter)?;
                self.coordinator
                    .read_first(
                        self.store.as_ref(),
                        &self.model,
                        self.request(&filter, options),
                    )
                    .await?
            }
        };

        match row {
            Some(row) => Ok(Some(self.attach(row, options).await?)),
            None => Ok(None),
        }
    }

    /// Every row in scope matching `filter`.
    pub async fn find_many(
        &self,
        filter: Filter,
        options: &FindOptions,
    ) -> Result<Vec<Row>, CrudError> {
        self.check_options(options)?;
        self.check_filter(&filter)?;
        let rows = self
            .coordinator
            .read_many(
                self.store.as_ref(),
                &self.model,
                self.request(&filter, options),
            )
            .await?;
        self.attach_all(rows, options).await
    }

    /// One page of rows with the filtered, non-deleted total.
    pub async fn find_list(
        &self,
        filter: Filter,
        page: PageRequest,
        options: &FindOptions,
    ) -> Result<Paginated<Row>, CrudError> {
        self.check_options(options)?;
        self.check_filter(&filter)?;
        let Paginated {
            data,
            total,
            page: _,
            per_page: _,
            total_pages: _,
        } = self
            .coordinator
            .read_page(
                self.store.as_ref(),
                &self.model,
                self.request(&filter, options),
                page,
            )
            .await?;
        let data = self.attach_all(data, options).await?;
        Ok(Paginated::new(data, total, page))
    }

    pub async fn count(&self, filter: Filter, options: &FindOptions) -> Result<u64, CrudError> {
        self.check_filter(&filter)?;
        let total = self
            .coordinator
            .count(
                self.store.as_ref(),
                &self.model,
                &filter,
                options.use_cache,
            )
            .await?;
        Ok(total)
    }

    /// Rows linked to `id` through `relation`; `None` when the owner is
    /// missing or out of scope.
    pub async fn get_relation(
        &self,
        id: &RecordId,
        relation: &str,
        options: &FindOptions,
    ) -> Result<Option<Related>, CrudError> {
        self.require_id(id)?;
        self.check_projection(&options.select)?;
        let relation = self.model.relation(relation).ok_or_else(|| {
            PreconditionError::UnknownRelation {
                model: self.model.name.clone(),
                relation: relation.to_string(),
            }
        })?;
        let related = self
            .coordinator
            .read_relation(
                self.store.as_ref(),
                &self.model,
                id,
                relation,
                &options.select,
                options.use_cache,
            )
            .await?;
        Ok(related)
    }

    #[instrument(skip_all, fields(model = %self.model.name))]
    pub async fn create(&self, ctx: &WriteContext, mut data: Row) -> Result<Row, CrudError> {
        let actor = self.require_actor(ctx)?;
        self.check_columns(&data)?;

        let now = audit_timestamp()?;
        let audit = &self.model.audit;
        stamp(&mut data, audit.created_at.as_deref(), Some(now.clone()));
        stamp(&mut data, audit.updated_at.as_deref(), Some(now));
        stamp(&mut data, audit.created_by.as_deref(), actor.clone());
        stamp(&mut data, audit.updated_by.as_deref(), actor);

        let key = RecordId::from_row(&data, &self.model.primary_key);
        let row = self
            .coordinator
            .commit_write(
                &self.model,
                "insert",
                key.as_ref(),
                self.store.insert(&self.model, data),
            )
            .await?;
        Ok(row)
    }

    #[instrument(skip_all, fields(model = %self.model.name, id = %id))]
    pub async fn update(
        &self,
        ctx: &WriteContext,
        id: &RecordId,
        mut data: Row,
    ) -> Result<Row, CrudError> {
        let actor = self.require_actor(ctx)?;
        self.require_id(id)?;
        if let Some(value) = data.remove(&self.model.primary_key)
            && RecordId::from_value(&value).as_ref() != Some(id)
        {
            return Err(PreconditionError::PrimaryKeyMismatch {
                expected: id.to_string(),
                found: value.to_string(),
            }
            .into());
        }
        self.check_columns(&data)?;

        let audit = &self.model.audit;
        stamp(&mut data, audit.updated_at.as_deref(), Some(audit_timestamp()?));
        stamp(&mut data, audit.updated_by.as_deref(), actor);

        self.write_by_key("update_by_key", id, data).await
    }

    /// Stamp the tombstone column; the row stays in the store.
    #[instrument(skip_all, fields(model = %self.model.name, id = %id))]
    pub async fn soft_delete(&self, ctx: &WriteContext, id: &RecordId) -> Result<Row, CrudError> {
        let actor = self.require_actor(ctx)?;
        self.require_id(id)?;
        let Some(column) = self.model.soft_delete_column.as_deref() else {
            return Err(PreconditionError::SoftDeleteUnsupported {
                model: self.model.name.clone(),
            }
            .into());
        };

        let now = audit_timestamp()?;
        let audit = &self.model.audit;
        let mut data = Row::new();
        stamp(&mut data, Some(column), Some(now.clone()));
        stamp(&mut data, audit.updated_at.as_deref(), Some(now));
        stamp(&mut data, audit.updated_by.as_deref(), actor.clone());
        stamp(&mut data, audit.deleted_by.as_deref(), actor);

        self.write_by_key("soft_delete", id, data).await
    }

    async fn write_by_key(
        &self,
        op: &'static str,
        id: &RecordId,
        data: Row,
    ) -> Result<Row, CrudError> {
        let row = self
            .coordinator
            .commit_write(
                &self.model,
                op,
                Some(id),
                self.store.update_by_key(&self.model, id, data),
            )
            .await?;
        Ok(row)
    }

    fn request<'a>(&self, filter: &'a Filter, options: &'a FindOptions) -> ReadRequest<'a> {
        ReadRequest {
            filter,
            order_by: &options.order_by,
            select: &options.select,
            use_cache: options.use_cache,
        }
    }

    async fn attach_all(&self, rows: Vec<Row>, options: &FindOptions) -> Result<Vec<Row>, CrudError> {
        let mut attached = Vec::with_capacity(rows.len());
        for row in rows {
            attached.push(self.attach(row, options).await?);
        }
        Ok(attached)
    }

    /// Insert each included relation into `row` under the relation's name.
    async fn attach(&self, mut row: Row, options: &FindOptions) -> Result<Row, CrudError> {
        if options.include.is_empty() {
            return Ok(row);
        }
        let Some(id) = RecordId::from_row(&row, &self.model.primary_key) else {
            return Ok(row);
        };
        let related_options = FindOptions {
            use_cache: options.use_cache,
            ..FindOptions::default()
        };
        for name in &options.include {
            let related = self.get_relation(&id, name, &related_options).await?;
            let value = related.map(Related::into_value).unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
        Ok(row)
    }

    fn require_actor(&self, ctx: &WriteContext) -> Result<Option<Value>, PreconditionError> {
        let actor = ctx
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|actor| !actor.is_empty());
        match actor {
            Some(actor) => Ok(Some(Value::String(actor.to_string()))),
            None if self.model.audit.require_actor => {
                debug!(model = %self.model.name, "Mutation rejected without actor");
                Err(PreconditionError::MissingActor {
                    model: self.model.name.clone(),
                })
            }
            None => Ok(None),
        }
    }

    fn require_id(&self, id: &RecordId) -> Result<(), PreconditionError> {
        if id.is_blank() {
            return Err(PreconditionError::MissingPrimaryKey {
                model: self.model.name.clone(),
            });
        }
        Ok(())
    }

    fn check_options(&self, options: &FindOptions) -> Result<(), PreconditionError> {
        self.check_projection(&options.select)?;
        for order in &options.order_by {
            check_column(&order.column)?;
        }
        for name in &options.include {
            if self.model.relation(name).is_none() {
                return Err(PreconditionError::UnknownRelation {
                    model: self.model.name.clone(),
                    relation: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_projection(&self, select: &Projection) -> Result<(), PreconditionError> {
        select
            .column_set()
            .into_iter()
            .flatten()
            .try_for_each(|column| check_column(column))
    }

    fn check_filter(&self, filter: &Filter) -> Result<(), PreconditionError> {
        filter
            .columns()
            .iter()
            .try_for_each(|column| check_column(column))
    }

    /// Write payloads may only carry plain columns, never relation objects.
    fn check_columns(&self, data: &Row) -> Result<(), PreconditionError> {
        for column in data.keys() {
            check_column(column)?;
            if self.model.relation(column).is_some() {
                return Err(PreconditionError::InvalidColumn {
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

fn check_column(column: &str) -> Result<(), PreconditionError> {
    if is_sql_identifier(column) {
        Ok(())
    } else {
        Err(PreconditionError::InvalidColumn {
            column: column.to_string(),
        })
    }
}

fn stamp(data: &mut Row, column: Option<&str>, value: Option<Value>) {
    if let (Some(column), Some(value)) = (column, value) {
        data.insert(column.to_string(), value);
    }
}

fn audit_timestamp() -> Result<Value, RepoError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map(Value::String)
        .map_err(|err| RepoError::invalid_input(format!("failed to format timestamp: {err}")))
}
