//! Per-record cache with field-subset tracking.
//!
//! Different call sites read different column subsets of the same row. Every
//! write merges into the existing entry, so a narrow early read never blocks
//! a wider later read once enough columns have accumulated.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::query::Projection;
use crate::domain::record::{RecordId, Row};

use super::keys::RecordKey;
use super::metrics;
use super::ttl::TtlCache;

const TIER: &str = "record";

/// Column values of one entity plus the set of columns known to be present.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    fields: BTreeSet<String>,
    data: Row,
    complete: bool,
}

impl CachedRecord {
    /// Record built from a row read with `projection`.
    ///
    /// Requested columns missing from the row are stored as null: the store
    /// answered for them. An unprojected read marks the record complete.
    pub fn from_read(row: Row, projection: &Projection) -> Self {
        match projection {
            Projection::All => Self::complete(row),
            Projection::Columns(columns) => {
                let mut data = row;
                for column in columns {
                    data.entry(column.clone()).or_insert(Value::Null);
                }
                Self::partial(data)
            }
        }
    }

    /// Every column of the row is present.
    pub fn complete(data: Row) -> Self {
        Self {
            fields: data.keys().cloned().collect(),
            data,
            complete: true,
        }
    }

    /// Only the columns present in `data` are known.
    pub fn partial(data: Row) -> Self {
        Self {
            fields: data.keys().cloned().collect(),
            data,
            complete: false,
        }
    }

    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    pub fn data(&self) -> &Row {
        &self.data
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Union the tracked fields and overlay `newer` data on top of `self`.
    pub fn merge(mut self, newer: CachedRecord) -> Self {
        self.fields.extend(newer.fields);
        self.data.extend(newer.data);
        self.complete |= newer.complete;
        self
    }

    /// Whether a read with `projection` can be answered from this record.
    pub fn satisfies(&self, projection: &Projection) -> bool {
        match projection {
            Projection::All => self.complete,
            Projection::Columns(columns) => columns.is_subset(&self.fields),
        }
    }

    /// A tracked field whose value is missing from `data`, if any.
    fn missing_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| !self.data.contains_key(field.as_str()))
            .map(String::as_str)
    }
}

pub struct RecordCache {
    entries: TtlCache<RecordKey, CachedRecord>,
}

impl RecordCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            entries: TtlCache::new(TIER, capacity),
        }
    }

    /// Merge `record` into the entry for `(model, id)` and restart its TTL.
    pub fn put(&self, model: &str, id: &RecordId, record: CachedRecord, ttl: Duration) {
        let key = RecordKey::new(model, id.clone());
        self.entries.upsert(key, ttl, |previous| match previous {
            Some(previous) => previous.merge(record),
            None => record,
        });
    }

    /// Projected row for `(model, id)` if the cached entry covers `projection`.
    pub fn get(&self, model: &str, id: &RecordId, projection: &Projection) -> Option<Row> {
        let key = RecordKey::new(model, id.clone());
        let Some(record) = self.load(&key) else {
            metrics::miss(TIER);
            return None;
        };

        if !record.satisfies(projection) {
            debug!(
                model,
                id = %id,
                cached = record.fields.len(),
                complete = record.complete,
                "Cached record lacks requested columns"
            );
            metrics::miss(TIER);
            return None;
        }

        metrics::hit(TIER);
        Some(projection.apply(&record.data))
    }

    /// Whatever is cached for `(model, id)`, regardless of which columns a
    /// caller needs.
    pub fn peek(&self, model: &str, id: &RecordId) -> Option<CachedRecord> {
        self.load(&RecordKey::new(model, id.clone()))
    }

    fn load(&self, key: &RecordKey) -> Option<CachedRecord> {
        let record = self.entries.get(key)?;
        if let Some(field) = record.missing_field() {
            warn!(
                model = %key.model,
                id = %key.id,
                field,
                "Dropping corrupt cached record"
            );
            metrics::corrupted(TIER);
            self.entries.delete(key);
            return None;
        }
        Some(record)
    }

    pub fn invalidate(&self, model: &str, id: &RecordId) -> bool {
        self.entries.delete(&RecordKey::new(model, id.clone()))
    }

    pub fn invalidate_model(&self, model: &str) -> usize {
        self.entries.delete_matching(|key| key.model == model)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.entries.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, model: &str, id: &RecordId, record: CachedRecord) {
        self.entries
            .set(RecordKey::new(model, id.clone()), record, Duration::from_secs(60));
    }
}
