//! In-process store with relational semantics.
//!
//! Tables are keyed by primary key and evaluated with the same filter,
//! ordering and projection rules a relational store applies. Every call is
//! counted and any operation can be made to fail once, which is how tests
//! observe cache behaviour.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::repos::{FindQuery, RepoError, Store};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::model::ModelDef;
use crate::domain::query::{Filter, Projection, compare_rows, values_equal};
use crate::domain::record::{RecordId, Row};

const SOURCE: &str = "infra::memory";

/// Store operation, used to count calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Count,
    FindMany,
    FindFirst,
    Insert,
    UpdateByKey,
}

/// Snapshot of call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub count: u64,
    pub find_many: u64,
    pub find_first: u64,
    pub insert: u64,
    pub update_by_key: u64,
}

impl StoreCalls {
    pub fn reads(&self) -> u64 {
        self.count + self.find_many + self.find_first
    }

    pub fn writes(&self) -> u64 {
        self.insert + self.update_by_key
    }

    pub fn total(&self) -> u64 {
        self.reads() + self.writes()
    }
}

#[derive(Default)]
struct Counters {
    count: AtomicU64,
    find_many: AtomicU64,
    find_first: AtomicU64,
    insert: AtomicU64,
    update_by_key: AtomicU64,
}

impl Counters {
    fn bump(&self, op: StoreOp) {
        let counter = match op {
            StoreOp::Count => &self.count,
            StoreOp::FindMany => &self.find_many,
            StoreOp::FindFirst => &self.find_first,
            StoreOp::Insert => &self.insert,
            StoreOp::UpdateByKey => &self.update_by_key,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> StoreCalls {
        StoreCalls {
            count: self.count.load(Ordering::SeqCst),
            find_many: self.find_many.load(Ordering::SeqCst),
            find_first: self.find_first.load(Ordering::SeqCst),
            insert: self.insert.load(Ordering::SeqCst),
            update_by_key: self.update_by_key.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<RecordId, Row>,
    unique: Vec<String>,
}

impl Table {
    fn next_id(&self) -> RecordId {
        let max = self
            .rows
            .keys()
            .filter_map(|id| match id {
                RecordId::Int(value) => Some(*value),
                RecordId::Text(_) => None,
            })
            .max()
            .unwrap_or(0);
        RecordId::Int(max + 1)
    }

    /// Reject `row` if it collides with another row on a unique column.
    fn check_unique(&self, table: &str, key: &RecordId, row: &Row) -> Result<(), RepoError> {
        for column in &self.unique {
            let Some(value) = row.get(column).filter(|value| !value.is_null()) else {
                continue;
            };
            let clash = self.rows.iter().any(|(other_key, other)| {
                other_key != key
                    && other
                        .get(column)
                        .is_some_and(|existing| values_equal(existing, value))
            });
            if clash {
                return Err(RepoError::Duplicate {
                    constraint: format!("{table}_{column}_key"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    failures: RwLock<HashMap<StoreOp, RepoError>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing counters. Rows must carry an `id`.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.seed_with_key(table, "id", rows);
    }

    pub fn seed_with_key(&self, table: &str, primary_key: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = rw_write(&self.tables, SOURCE, "seed");
        let entry = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(id) = RecordId::from_row(&row, primary_key) {
                entry.rows.insert(id, row);
            }
        }
    }

    /// Declare a unique constraint on `table.column`.
    pub fn with_unique(self, table: &str, column: &str) -> Self {
        rw_write(&self.tables, SOURCE, "with_unique")
            .entry(table.to_string())
            .or_default()
            .unique
            .push(column.to_string());
        self
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: StoreOp, error: RepoError) {
        rw_write(&self.failures, SOURCE, "fail_next").insert(op, error);
    }

    pub fn calls(&self) -> StoreCalls {
        self.counters.snapshot()
    }

    /// Physical row, including soft-deleted ones.
    pub fn row(&self, table: &str, id: &RecordId) -> Option<Row> {
        rw_read(&self.tables, SOURCE, "row")
            .get(table)
            .and_then(|table| table.rows.get(id).cloned())
    }

    /// Number of physical rows in `table`.
    pub fn len(&self, table: &str) -> usize {
        rw_read(&self.tables, SOURCE, "len")
            .get(table)
            .map_or(0, |table| table.rows.len())
    }

    fn begin(&self, op: StoreOp) -> Result<(), RepoError> {
        self.counters.bump(op);
        match rw_write(&self.failures, SOURCE, "begin").remove(&op) {
            Some(error) => {
                debug!(?op, %error, "Injected store failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn matching(&self, model: &ModelDef, filter: &Filter) -> Vec<Row> {
        rw_read(&self.tables, SOURCE, "matching")
            .get(model.table_name())
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn count(&self, model: &ModelDef, filter: &Filter) -> Result<u64, RepoError> {
        self.begin(StoreOp::Count)?;
        Ok(self.matching(model, filter).len() as u64)
    }

    async fn find_many(
        &self,
        model: &ModelDef,
        query: FindQuery<'_>,
    ) -> Result<Vec<Row>, RepoError> {
        self.begin(StoreOp::FindMany)?;
        let mut rows = self.matching(model, query.filter);
        rows.sort_by(|left, right| compare_rows(left, right, query.order_by));

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let take = query
            .take
            .map_or(usize::MAX, |take| usize::try_from(take).unwrap_or(usize::MAX));
        Ok(rows
            .iter()
            .skip(skip)
            .take(take)
            .map(|row| query.select.apply(row))
            .collect())
    }

    async fn find_first(
        &self,
        model: &ModelDef,
        filter: &Filter,
        select: &Projection,
    ) -> Result<Option<Row>, RepoError> {
        self.begin(StoreOp::FindFirst)?;
        Ok(self
            .matching(model, filter)
            .first()
            .map(|row| select.apply(row)))
    }

    async fn insert(&self, model: &ModelDef, mut data: Row) -> Result<Row, RepoError> {
        self.begin(StoreOp::Insert)?;
        let table_name = model.table_name();
        let mut tables = rw_write(&self.tables, SOURCE, "insert");
        let table = tables.entry(table_name.to_string()).or_default();

        let id = match data.get(&model.primary_key) {
            None | Some(Value::Null) => {
                let id = table.next_id();
                data.insert(model.primary_key.clone(), id.to_value());
                id
            }
            Some(value) => RecordId::from_value(value).ok_or_else(|| {
                RepoError::invalid_input(format!("`{}` is not a valid key", model.primary_key))
            })?,
        };
        if table.rows.contains_key(&id) {
            return Err(RepoError::Duplicate {
                constraint: format!("{table_name}_pkey"),
            });
        }
        table.check_unique(table_name, &id, &data)?;
        table.rows.insert(id, data.clone());
        Ok(data)
    }

    async fn update_by_key(
        &self,
        model: &ModelDef,
        key: &RecordId,
        data: Row,
    ) -> Result<Row, RepoError> {
        self.begin(StoreOp::UpdateByKey)?;
        let table_name = model.table_name();
        let mut tables = rw_write(&self.tables, SOURCE, "update_by_key");
        let table = tables.get_mut(table_name).ok_or(RepoError::NotFound)?;
        let mut updated = table.rows.get(key).cloned().ok_or(RepoError::NotFound)?;
        updated.extend(data);
        table.check_unique(table_name, key, &updated)?;
        table.rows.insert(key.clone(), updated.clone());
        Ok(updated)
    }
}
