//! In-process cache tiers for the data-access layer.
//!
//! - **Record tier**: column values per `(model, id)` with field tracking
//! - **Relation tier**: linked identifiers per `(model, id, relation)`
//! - **Query tier**: ordered ids and totals per query signature
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 10000
//! sweep_interval_seconds = 30
//! ```
//!
//! Per-model lifetimes come from each model's `cache.ttl_seconds`.

mod config;
mod coordinator;
mod keys;
pub(crate) mod lock;
pub mod metrics;
mod planner;
mod query;
mod record;
mod relation;
mod ttl;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

pub use config::CacheConfig;
pub use coordinator::{CacheCoordinator, CacheStats, ReadRequest, Related};
pub use keys::{QueryKey, QueryKind, QuerySignature, RecordKey, RelationKey};
pub use planner::InvalidationPlan;
pub use query::{QueryCache, QueryResultSet};
pub use record::{CachedRecord, RecordCache};
pub use relation::{RelationCache, RelationLink};
pub use ttl::{CacheEntry, TtlCache};

/// Spawn a task that periodically purges expired entries from every tier.
///
/// Returns `None` when the cache is disabled or no sweep interval is
/// configured; lazy expiry on read applies either way.
pub fn spawn_sweeper(coordinator: Arc<CacheCoordinator>) -> Option<JoinHandle<()>> {
    let config = coordinator.config();
    if !config.is_enabled() {
        return None;
    }
    let period = config.sweep_interval()?;

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = coordinator.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired cache entries");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::domain::model::{ModelDef, ModelRegistry};
    use crate::domain::record::RecordId;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_entries() {
        let registry = Arc::new(
            ModelRegistry::new(vec![ModelDef::new("users")]).expect("valid models"),
        );
        let config = CacheConfig {
            sweep_interval_seconds: Some(5),
            ..CacheConfig::default()
        };
        let coordinator = Arc::new(CacheCoordinator::new(registry, config));
        let data = json!({"id": 1}).as_object().cloned().expect("object");
        coordinator.records().put(
            "users",
            &RecordId::Int(1),
            CachedRecord::complete(data),
            Duration::from_secs(3),
        );

        let handle = spawn_sweeper(Arc::clone(&coordinator)).expect("sweeper enabled");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(coordinator.stats().records, 0);
        handle.abort();
    }

    #[test]
    fn sweeper_is_off_without_interval() {
        let registry = Arc::new(ModelRegistry::default());
        let coordinator = Arc::new(CacheCoordinator::new(registry, CacheConfig::default()));
        assert!(spawn_sweeper(coordinator).is_none());
    }
}
