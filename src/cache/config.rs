//! Cache configuration.
//!
//! Controls the record, relation and query tiers via the `[cache]` section.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Cache configuration shared by every tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch. When off every read goes straight to the store.
    pub enabled: bool,
    /// Per-tier LRU bound; `None` leaves the tiers bounded by TTL only.
    pub max_entries: Option<usize>,
    /// Period of the background expiry sweep; `None` relies on lazy expiry.
    pub sweep_interval_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            sweep_interval_seconds: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: Some(settings.max_entries.get()),
            sweep_interval_seconds: settings.sweep_interval.map(|interval| interval.as_secs()),
        }
    }
}

impl CacheConfig {
    /// A configuration that never caches anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the tier capacity, clamping zero to 1.
    pub fn max_entries_non_zero(&self) -> Option<NonZeroUsize> {
        self.max_entries
            .map(|limit| NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}
