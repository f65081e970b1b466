//! Result cache for persistent-cache requests.
//!
//! Maps the final request target (built with the logical callback name, no
//! nonce) to the first terminal non-timeout outcome seen for it. Entries are
//! never evicted: callers opt in per request and accept growth for the
//! lifetime of the client.

use crate::metrics::CacheMetrics;
use jsonp_core::outcome::CachedOutcome;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Unbounded outcome cache shared by every request of a client
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CachedOutcome>>,
}

impl ResultCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached outcome for `target`, if any
    #[must_use]
    pub fn lookup(&self, target: &str) -> Option<CachedOutcome> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned();

        if entry.is_some() {
            CacheMetrics::record_hit();
            tracing::debug!(url = target, "Result cache hit");
        } else {
            CacheMetrics::record_miss();
        }
        entry
    }

    /// Remember `entry` for `target`, replacing any previous entry
    pub fn store(&self, target: impl Into<String>, entry: CachedOutcome) {
        let target = target.into();
        tracing::trace!(url = %target, "Storing result in cache");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, entry);
    }

    /// Number of cached targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
