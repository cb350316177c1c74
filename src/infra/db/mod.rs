//! Postgres-backed store.

mod sql;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    query,
    postgres::{PgPool, PgPoolOptions},
};

use crate::application::repos::{FindQuery, RepoError, Store};
use crate::domain::model::ModelDef;
use crate::domain::query::{Filter, Projection};
use crate::domain::record::{RecordId, Row};

use util::{convert_count, decode_row};

#[derive(Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn count(&self, model: &ModelDef, filter: &Filter) -> Result<u64, RepoError> {
        let mut qb = sql::count(model, filter)?;
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert_count(count)
    }

    async fn find_many(
        &self,
        model: &ModelDef,
        query: FindQuery<'_>,
    ) -> Result<Vec<Row>, RepoError> {
        let mut qb = sql::select(model, query)?;
        let rows: Vec<Value> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(decode_row).collect()
    }

    async fn find_first(
        &self,
        model: &ModelDef,
        filter: &Filter,
        select: &Projection,
    ) -> Result<Option<Row>, RepoError> {
        let mut qb = sql::select(model, FindQuery::new(filter, select).window(0, 1))?;
        let row: Option<Value> = qb
            .build_query_scalar()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(decode_row).transpose()
    }

    async fn insert(&self, model: &ModelDef, data: Row) -> Result<Row, RepoError> {
        let mut qb = sql::insert(model, &data)?;
        let row: Value = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        decode_row(row)
    }

    async fn update_by_key(
        &self,
        model: &ModelDef,
        key: &RecordId,
        data: Row,
    ) -> Result<Row, RepoError> {
        let Some(mut qb) = sql::update(model, key, &data)? else {
            let filter = Filter::eq(&model.primary_key, key.to_value());
            return self
                .find_first(model, &filter, &Projection::All)
                .await?
                .ok_or(RepoError::NotFound);
        };
        let row: Option<Value> = qb
            .build_query_scalar()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(decode_row).transpose()?.ok_or(RepoError::NotFound)
    }
}
