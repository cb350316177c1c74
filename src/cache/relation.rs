//! Relation membership cache.
//!
//! Only identifiers are stored here. Bodies of linked rows live in the
//! record cache under their own model.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::domain::record::RecordId;

use super::keys::RelationKey;
use super::metrics;
use super::ttl::TtlCache;

const TIER: &str = "relation";

/// Cached relation membership.
///
/// An empty `Many` and a `One(None)` are known-empty results. A missing
/// cache entry means the membership is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationLink {
    One(Option<RecordId>),
    /// Ordered as the store returned them.
    Many(Vec<RecordId>),
}

impl RelationLink {
    pub fn ids(&self) -> &[RecordId] {
        match self {
            RelationLink::One(Some(id)) => std::slice::from_ref(id),
            RelationLink::One(None) => &[],
            RelationLink::Many(ids) => ids,
        }
    }
}

pub struct RelationCache {
    links: TtlCache<RelationKey, RelationLink>,
}

impl RelationCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            links: TtlCache::new(TIER, capacity),
        }
    }

    pub fn put_link(
        &self,
        model: &str,
        id: &RecordId,
        relation: &str,
        link: RelationLink,
        ttl: Duration,
    ) {
        self.links
            .set(RelationKey::new(model, id.clone(), relation), link, ttl);
    }

    pub fn get_link(&self, model: &str, id: &RecordId, relation: &str) -> Option<RelationLink> {
        let link = self
            .links
            .get(&RelationKey::new(model, id.clone(), relation));
        match link {
            Some(_) => metrics::hit(TIER),
            None => metrics::miss(TIER),
        }
        link
    }

    /// Drop every link owned by `(model, id)`.
    pub fn invalidate_owner(&self, model: &str, id: &RecordId) -> usize {
        self.links
            .delete_matching(|key| key.model == model && &key.id == id)
    }

    /// Drop every link owned by any row of `model`.
    pub fn invalidate_model(&self, model: &str) -> usize {
        self.links.delete_matching(|key| key.model == model)
    }

    pub fn clear(&self) {
        self.links.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.links.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
