//! Skipped-event store.
//!
//! The pipeline only ever asks "is this instance id skipped?".  Persistence
//! and the mutation endpoint live outside the data plane; the in-memory
//! implementation below is what a single-box deployment (and every test)
//! uses.

use std::collections::HashSet;
use std::sync::RwLock;

/// Read-side contract used by the filter stage and handlers.
pub trait SkippedStore: Send + Sync {
    fn is_skipped(&self, event_id: &str) -> bool;
}

/// Concurrent in-memory implementation.
#[derive(Debug, Default)]
pub struct InMemorySkippedStore {
    ids: RwLock<HashSet<String>>,
}

impl InMemorySkippedStore {
    pub fn new() -> Self {
        InMemorySkippedStore::default()
    }

    pub fn skip(&self, event_id: impl Into<String>) {
        self.ids.write().expect("skipped lock").insert(event_id.into());
    }

    pub fn unskip(&self, event_id: &str) {
        self.ids.write().expect("skipped lock").remove(event_id);
    }
}

impl SkippedStore for InMemorySkippedStore {
    fn is_skipped(&self, event_id: &str) -> bool {
        self.ids.read().expect("skipped lock").contains(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_and_unskip() {
        let store = InMemorySkippedStore::new();
        assert!(!store.is_skipped("a"));
        store.skip("a");
        assert!(store.is_skipped("a"));
        store.unskip("a");
        assert!(!store.is_skipped("a"));
    }
}
