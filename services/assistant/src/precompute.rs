//! Refresh-time voice-response precomputation.
//!
//! The handful of parameter-free voice answers are computed once per
//! publish, stamped with the window version, and swapped in atomically
//! beside the window.  A handler that reads window version `v` but finds
//! precomputed responses for `v-1` treats it as a miss and computes on
//! demand — precompute is an optimization, never a source of staleness.
//!
//! Precomputation runs as its own single-stage pipeline so its results
//! travel through `ProcessingContext::extra` like every other cross-stage
//! product.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chime_protocol::EventWindow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::handlers::intents::{
    self, DetailLevel, IntentDeps, MorningSummaryParams,
};
use crate::pipeline::{ProcessingContext, Stage, StageResult};

/// Context key the precompute stage deposits under.
pub const EXTRA_KEY: &str = "precomputed_responses";

/// Response names, shared with the handler runner.
pub const NEXT_MEETING: &str = "next-meeting";
pub const TIME_UNTIL_NEXT: &str = "time-until-next";
pub const DONE_FOR_DAY: &str = "done-for-day";
pub const MORNING_SUMMARY: &str = "morning-summary";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Precomputed answers for one window version.
#[derive(Debug, Default)]
pub struct PrecomputedResponses {
    pub version: u64,
    responses: HashMap<String, Arc<Value>>,
}

impl PrecomputedResponses {
    pub fn new(version: u64) -> Self {
        PrecomputedResponses {
            version,
            responses: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, payload: Value) {
        self.responses.insert(name.to_owned(), Arc::new(payload));
    }

    pub fn names(&self) -> Vec<&str> {
        self.responses.keys().map(String::as_str).collect()
    }
}

/// Atomically swapped holder, read by handlers without locks.
pub struct PrecomputeStore {
    enabled: bool,
    inner: ArcSwap<PrecomputedResponses>,
}

impl PrecomputeStore {
    pub fn new(enabled: bool) -> Self {
        PrecomputeStore {
            enabled,
            inner: ArcSwap::from_pointee(PrecomputedResponses::default()),
        }
    }

    /// Look up `name`, but only if the stored answers belong to
    /// `window_version` — anything else is a miss.
    pub fn get(&self, name: &str, window_version: u64) -> Option<Arc<Value>> {
        if !self.enabled {
            return None;
        }
        let current = self.inner.load();
        if current.version != window_version {
            return None;
        }
        current.responses.get(name).cloned()
    }

    pub fn install(&self, responses: PrecomputedResponses) {
        debug!(
            version = responses.version,
            names = ?responses.names(),
            "precomputed responses installed"
        );
        self.inner.store(Arc::new(responses));
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Compute the standard precomputed set for a freshly published window.
pub fn build_precomputed(
    window: &EventWindow,
    now: DateTime<Utc>,
    default_tz: Tz,
    deps: &IntentDeps,
) -> PrecomputedResponses {
    let mut out = PrecomputedResponses::new(window.version);

    let next = intents::next_meeting(window, now, default_tz, deps);
    out.insert(NEXT_MEETING, serde_json::to_value(next).expect("serializable response"));

    let until = intents::time_until_next(window, now, deps);
    out.insert(
        TIME_UNTIL_NEXT,
        serde_json::to_value(until).expect("serializable response"),
    );

    let done = intents::done_for_day(window, now, default_tz, deps);
    out.insert(
        DONE_FOR_DAY,
        serde_json::to_value(done).expect("serializable response"),
    );

    // Morning summary precomputes the *next* morning — asked in the
    // evening, that is what the user means.
    let tomorrow = (now.with_timezone(&default_tz) + chrono::Duration::days(1)).date_naive();
    let morning = intents::morning_summary(
        window,
        &MorningSummaryParams {
            date: tomorrow,
            tz: default_tz,
            detail_level: DetailLevel::Standard,
            max_events: 10,
        },
        deps,
    );
    out.insert(
        MORNING_SUMMARY,
        serde_json::to_value(morning).expect("serializable response"),
    );

    out
}

// ---------------------------------------------------------------------------
// Pipeline stage
// ---------------------------------------------------------------------------

/// Deposits the precomputed set into `ctx.extra[EXTRA_KEY]`.
pub struct PrecomputeStage {
    pub window: Arc<EventWindow>,
    pub default_tz: Tz,
    pub deps: IntentDeps,
}

#[async_trait]
impl Stage for PrecomputeStage {
    fn name(&self) -> &'static str {
        "precompute"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let responses = build_precomputed(&self.window, ctx.now, self.default_tz, &self.deps);
        let json: HashMap<String, Value> = responses
            .responses
            .iter()
            .map(|(name, payload)| (name.clone(), payload.as_ref().clone()))
            .collect();
        ctx.extra.insert(
            EXTRA_KEY.to_owned(),
            serde_json::to_value(json).expect("serializable map"),
        );
        let events = std::mem::take(&mut ctx.events);
        StageResult::ok(events.len(), events)
    }
}

/// Rebuild a [`PrecomputedResponses`] from a precompute pipeline's context
/// deposit.
pub fn from_extra(extra: &Value, version: u64) -> PrecomputedResponses {
    let mut out = PrecomputedResponses::new(version);
    if let Value::Object(map) = extra {
        for (name, payload) in map {
            out.insert(name, payload.clone());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
