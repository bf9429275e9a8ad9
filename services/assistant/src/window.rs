//! Event window ownership and publication.
//!
//! The publisher owns the only mutable handle to the shared window.
//! Readers call [`WindowPublisher::read`] and get an `Arc` to a complete,
//! immutable window — no locks on the read path, ever.  Writers replace
//! the whole window atomically and bump the monotonic version.
//!
//! # Smart fallback
//! A refresh that would replace a working window with nothing is treated
//! as suspicious: when the candidate is empty AND either every source
//! failed this cycle, or the prior window was non-empty while at least one
//! source failed, the old window stays authoritative and the cycle is
//! recorded as degraded.  An empty result with all sources healthy is a
//! genuinely clear calendar and publishes normally.

use arc_swap::ArcSwap;
use chime_protocol::{CalendarEvent, EventWindow};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What the refresh cycle observed about its sources; input to the
/// fallback heuristic.
#[derive(Debug, Clone, Copy)]
pub struct CycleStats {
    pub sources_total: usize,
    pub sources_failed: usize,
}

impl CycleStats {
    pub fn all_failed(&self) -> bool {
        self.sources_total > 0 && self.sources_failed >= self.sources_total
    }
}

/// Outcome of an install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishDecision {
    Published { version: u64, event_count: usize },
    Preserved { reason: String },
}

pub struct WindowPublisher {
    current: ArcSwap<EventWindow>,
    /// Serializes writers; readers never touch it.
    publish_lock: Mutex<()>,
}

impl WindowPublisher {
    pub fn new(now: DateTime<Utc>) -> Self {
        WindowPublisher {
            current: ArcSwap::from_pointee(EventWindow::empty(now)),
            publish_lock: Mutex::new(()),
        }
    }

    /// Non-blocking read of the current window.
    pub fn read(&self) -> Arc<EventWindow> {
        self.current.load_full()
    }

    /// Install a refreshed window, subject to the smart fallback.
    pub fn install(
        &self,
        events: Vec<CalendarEvent>,
        stats: &CycleStats,
        now: DateTime<Utc>,
    ) -> PublishDecision {
        let _guard = self.publish_lock.lock().expect("publish lock");
        let previous = self.current.load();

        if events.is_empty() {
            let prior_nonempty = !previous.events.is_empty();
            let suspicious = stats.all_failed()
                || (prior_nonempty && stats.sources_failed > 0);
            if suspicious {
                let reason = format!(
                    "refusing to wipe window: 0 candidate events with {}/{} sources failed",
                    stats.sources_failed, stats.sources_total
                );
                warn!(
                    prior_events = previous.events.len(),
                    prior_version = previous.version,
                    "{}",
                    reason
                );
                return PublishDecision::Preserved { reason };
            }
        }

        let version = previous.version + 1;
        let event_count = events.len();
        self.current.store(Arc::new(EventWindow {
            events,
            version,
            published_at: now,
        }));
        info!(version, event_count, "event window published");
        PublishDecision::Published {
            version,
            event_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
