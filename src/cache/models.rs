//! Cache entry and statistics models.

// Author: kelexine (https://github.com/kelexine)

use crate::models::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored reply, written once per key and never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Full reconstructed reply text.
    pub response: String,
    /// Token usage reported with the original reply, if any.
    pub usage: Option<Usage>,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
}

/// Statistics for cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of successful cache hits.
    pub hits: u64,
    /// Number of cache misses, including unreadable entries.
    pub misses: u64,
    /// Number of entries persisted.
    pub writes: u64,
    /// Number of entries that could not be persisted.
    pub write_failures: u64,
}
