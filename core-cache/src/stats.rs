//! Cache statistics for diagnostics.

use serde::{Deserialize, Serialize};

/// Snapshot of cache usage. Nothing in the engine branches on these numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live and not-yet-swept cache entries
    pub entries: u64,

    /// Sum of estimated entry sizes
    pub total_bytes: u64,

    /// Configured budget
    pub max_bytes: u64,

    pub hits: u64,
    pub misses: u64,

    /// Chapter downloads queued or running
    pub active_downloads: usize,

    /// Chapter downloads waiting for the network
    pub deferred_downloads: usize,
}

impl CacheStats {
    /// Hits over lookups, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }

    /// Calculate cache usage as a percentage of the budget.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        (self.total_bytes as f64 / self.max_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }
}
