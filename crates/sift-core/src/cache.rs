//! Per-query memoization of finished bundles.
//!
//! Keys are the literal query string: case-sensitive, no normalization, no TTL. Entries live as
//! long as the cache does. The cache stores snapshots; the trace keeps ownership of what it
//! attaches.

use crate::trace::Bundle;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<String, Bundle>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query: &str) -> Option<&Bundle> {
        self.entries.get(query)
    }

    /// Store a snapshot of `bundle` under its query. Empty bundles are stored too, so a repeat
    /// of a fruitless query short-circuits to "no results".
    pub fn insert(&mut self, bundle: &Bundle) {
        self.entries.insert(bundle.query.clone(), bundle.clone());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
