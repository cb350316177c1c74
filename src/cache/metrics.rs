//! Metric names and recording helpers shared by the cache tiers.

use metrics::{counter, histogram};

pub const METRIC_CACHE_HIT: &str = "rowcache_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "rowcache_cache_miss_total";
pub const METRIC_CACHE_EVICT: &str = "rowcache_cache_evict_total";
pub const METRIC_CACHE_INVALIDATE: &str = "rowcache_cache_invalidate_total";
pub const METRIC_CACHE_CORRUPTION: &str = "rowcache_cache_corruption_total";
pub const METRIC_STORE_MS: &str = "rowcache_store_ms";

pub(crate) fn hit(tier: &'static str) {
    counter!(METRIC_CACHE_HIT, "tier" => tier).increment(1);
}

pub(crate) fn miss(tier: &'static str) {
    counter!(METRIC_CACHE_MISS, "tier" => tier).increment(1);
}

/// `reason` is `capacity` or `expired`.
pub(crate) fn evicted(tier: &'static str, reason: &'static str, count: usize) {
    if count > 0 {
        counter!(METRIC_CACHE_EVICT, "tier" => tier, "reason" => reason).increment(count as u64);
    }
}

pub(crate) fn invalidated(tier: &'static str, count: usize) {
    if count > 0 {
        counter!(METRIC_CACHE_INVALIDATE, "tier" => tier).increment(count as u64);
    }
}

pub(crate) fn corrupted(tier: &'static str) {
    counter!(METRIC_CACHE_CORRUPTION, "tier" => tier).increment(1);
}

pub(crate) fn store_latency(op: &'static str, millis: f64) {
    histogram!(METRIC_STORE_MS, "op" => op).record(millis);
}
