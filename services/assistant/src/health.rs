//! Refresh-cycle health tracking.
//!
//! The tracker is written by the scheduler and fetch orchestrator and read
//! by `/healthz`.  Status derivation:
//!
//! - `critical`: never refreshed successfully, or the last success (or the
//!   background heartbeat) is older than three refresh intervals;
//! - `degraded`: the most recent cycle failed or fell back to the stale
//!   window;
//! - `ok`: otherwise.

use chime_protocol::{HealthSnapshot, HealthStatus};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

pub struct HealthTracker {
    refresh_interval: Duration,
    inner: Mutex<HealthState>,
}

#[derive(Debug, Default)]
struct HealthState {
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    heartbeat: Option<DateTime<Utc>>,
    event_count: u64,
    degraded: bool,
    degraded_note: Option<String>,
    fetch_attempts: u64,
    fetch_successes: u64,
}

impl HealthTracker {
    pub fn new(refresh_interval: Duration) -> Self {
        HealthTracker {
            refresh_interval,
            inner: Mutex::new(HealthState::default()),
        }
    }

    pub fn record_attempt(&self, now: DateTime<Utc>) {
        self.inner.lock().expect("health lock").last_attempt = Some(now);
    }

    pub fn record_success(&self, now: DateTime<Utc>, event_count: u64) {
        let mut state = self.inner.lock().expect("health lock");
        state.last_success = Some(now);
        state.event_count = event_count;
        state.degraded = false;
        state.degraded_note = None;
    }

    pub fn record_degraded(&self, note: impl Into<String>) {
        let mut state = self.inner.lock().expect("health lock");
        state.degraded = true;
        state.degraded_note = Some(note.into());
    }

    pub fn record_heartbeat(&self, now: DateTime<Utc>) {
        self.inner.lock().expect("health lock").heartbeat = Some(now);
    }

    pub fn record_fetch_attempt(&self) {
        self.inner.lock().expect("health lock").fetch_attempts += 1;
    }

    pub fn record_fetch_success(&self) {
        self.inner.lock().expect("health lock").fetch_successes += 1;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let state = self.inner.lock().expect("health lock");
        let stale_after =
            chrono::Duration::from_std(self.refresh_interval * 3).unwrap_or(chrono::Duration::hours(1));

        let success_stale = match state.last_success {
            Some(t) => now - t > stale_after,
            None => true,
        };
        let heartbeat_stale = match state.heartbeat {
            Some(t) => now - t > stale_after,
            None => true,
        };

        let status = if success_stale || heartbeat_stale {
            HealthStatus::Critical
        } else if state.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        let mut notes = Vec::new();
        if let Some(note) = &state.degraded_note {
            notes.push(note.clone());
        }
        if state.fetch_attempts > 0 {
            notes.push(format!(
                "fetches: {}/{} succeeded",
                state.fetch_successes, state.fetch_attempts
            ));
        }

        HealthSnapshot {
            last_attempt: state.last_attempt,
            last_success: state.last_success,
            event_count: state.event_count,
            heartbeat: state.heartbeat,
            last_probe_ok: status != HealthStatus::Critical,
            notes,
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
