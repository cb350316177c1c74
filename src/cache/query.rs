//! Query result cache.
//!
//! A result set holds the ordered primary keys a query produced plus its
//! pagination metadata, never row bodies.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::application::pagination::{PageRequest, total_pages};
use crate::domain::record::RecordId;

use super::keys::{QueryKey, QuerySignature};
use super::metrics;
use super::ttl::TtlCache;

const TIER: &str = "query";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResultSet {
    pub ids: Vec<RecordId>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
}

impl QueryResultSet {
    /// One page of a paginated read.
    pub fn page(ids: Vec<RecordId>, total: u64, request: PageRequest) -> Self {
        Self {
            ids,
            total,
            page: request.page(),
            per_page: request.per_page(),
            total_pages: total_pages(total, request.per_page()),
        }
    }

    /// An unpaginated read: everything fits on a single page.
    pub fn unpaged(ids: Vec<RecordId>) -> Self {
        let total = ids.len() as u64;
        let per_page = u32::try_from(ids.len()).unwrap_or(u32::MAX).max(1);
        Self {
            ids,
            total,
            page: 1,
            per_page,
            total_pages: total_pages(total, per_page),
        }
    }

    /// A count-only result.
    pub fn count(total: u64) -> Self {
        Self {
            ids: Vec::new(),
            total,
            page: 1,
            per_page: 1,
            total_pages: total,
        }
    }
}

pub struct QueryCache {
    results: TtlCache<QueryKey, QueryResultSet>,
}

impl QueryCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            results: TtlCache::new(TIER, capacity),
        }
    }

    pub fn put(
        &self,
        model: &str,
        signature: &QuerySignature,
        result: QueryResultSet,
        ttl: Duration,
    ) {
        self.results.set(key(model, signature), result, ttl);
    }

    pub fn get(&self, model: &str, signature: &QuerySignature) -> Option<QueryResultSet> {
        let result = self.results.get(&key(model, signature));
        match result {
            Some(_) => metrics::hit(TIER),
            None => metrics::miss(TIER),
        }
        result
    }

    pub fn invalidate(&self, model: &str, signature: &QuerySignature) -> bool {
        self.results.delete(&key(model, signature))
    }

    pub fn invalidate_model(&self, model: &str) -> usize {
        self.results.delete_matching(|key| key.model == model)
    }

    pub fn clear(&self) {
        self.results.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.results.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

fn key(model: &str, signature: &QuerySignature) -> QueryKey {
    QueryKey {
        model: model.to_string(),
        signature: signature.clone(),
    }
}
