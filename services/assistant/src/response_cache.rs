//! Parameterized voice-response cache.
//!
//! Covers requests the precomputer did not: keyed by (handler name, window
//! version, stable hash of the canonicalized query parameters).  A publish
//! makes every old key unreachable via the version component; an explicit
//! `invalidate_all` exists for belt-and-braces on publish.
//!
//! The hash is `std::hash` SipHash — fast and non-cryptographic, which is
//! fine because keys are derived from already-authenticated requests.

use lru::LruCache;
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const CAPACITY: usize = 100;

pub struct ResponseCache {
    enabled: bool,
    entries: Mutex<LruCache<u64, Arc<Value>>>,
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        ResponseCache {
            enabled,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Stable key over handler, window version and canonicalized params.
    pub fn key(handler: &str, window_version: u64, params: &[(String, String)]) -> u64 {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        handler.hash(&mut hasher);
        window_version.hash(&mut hasher);
        for (name, value) in sorted {
            name.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<Arc<Value>> {
        if !self.enabled {
            return None;
        }
        self.entries.lock().expect("cache lock").get(&key).cloned()
    }

    pub fn put(&self, key: u64, value: Arc<Value>) {
        if !self.enabled {
            return;
        }
        self.entries.lock().expect("cache lock").put(key, value);
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().expect("cache lock").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
