//! Recurrence expansion.
//!
//! Turns an RRULE master into concrete instance events inside an expansion
//! window, under a per-rule occurrence cap and wall-clock budget.  The
//! occurrence producer is lazy and yields back to the scheduler every N
//! occurrences so voice handlers sharing the runtime are never starved —
//! that yield is a correctness requirement, not a tuning knob.
//!
//! Callers bound parallelism: the assistant runs expansions under a
//! semaphore sized by `RRULE_WORKER_CONCURRENCY`.
//!
//! # Window selection
//! - Finite rule (COUNT or UNTIL): expand from the master's start.
//! - Infinite rule: expand from `max(now - 7 days, master start)`.  An
//!   infinite rule with a years-old master must not burn the occurrence
//!   cap on history before reaching "now".
//!
//! # Suppression
//! A single suppression list covers both EXDATE instants and the original
//! instants of RECURRENCE-ID overrides; matching uses a configurable
//! tolerance (default ±60 s) to absorb serialization round-trips.

use async_stream::stream;
use chime_protocol::{CalendarEvent, EventDateTime};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt, pin_mut};
use rrule::RRuleSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Config and results
// ---------------------------------------------------------------------------

/// Expansion parameters for one refresh cycle.
#[derive(Debug, Clone)]
pub struct ExpandConfig {
    /// "Now" for the infinite-rule clamp.
    pub now: DateTime<Utc>,
    /// Upper bound of the expansion window (`now + RRULE_EXPANSION_DAYS`).
    pub window_end: DateTime<Utc>,
    /// Max instances emitted per rule.
    pub occurrence_cap: usize,
    /// Wall-clock budget per rule.
    pub time_budget: Duration,
    /// Cooperative yield frequency, in scanned occurrences.
    pub yield_every: usize,
    /// Tolerance when matching suppression instants.
    pub suppress_tolerance: chrono::Duration,
    /// Guard against pathological rules (e.g. SECONDLY from years back).
    pub max_scan_iterations: usize,
}

impl ExpandConfig {
    pub fn new(now: DateTime<Utc>, expansion_days: i64) -> Self {
        ExpandConfig {
            now,
            window_end: now + chrono::Duration::days(expansion_days),
            occurrence_cap: 250,
            time_budget: Duration::from_millis(200),
            yield_every: 50,
            suppress_tolerance: chrono::Duration::seconds(60),
            max_scan_iterations: 50_000,
        }
    }
}

/// Outcome of expanding one master.  Partial results are kept on budget or
/// cap overruns; the warnings say which limit was hit.
#[derive(Debug, Default)]
pub struct Expansion {
    pub instances: Vec<CalendarEvent>,
    pub warnings: Vec<String>,
    pub cap_reached: bool,
    pub budget_exceeded: bool,
}

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("malformed RRULE on {uid}: {message}")]
    RRuleParse { uid: String, message: String },
    #[error("event {0} has no RRULE")]
    NotRecurring(String),
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Expand `master` into instance events.
///
/// `suppress` carries EXDATE instants plus the original instants of
/// RECURRENCE-ID overrides, both already resolved to UTC.
pub async fn expand_master(
    master: &CalendarEvent,
    suppress: &[DateTime<Utc>],
    cfg: &ExpandConfig,
) -> Result<Expansion, ExpandError> {
    let rrule_raw = master
        .rrule_raw
        .as_deref()
        .ok_or_else(|| ExpandError::NotRecurring(master.uid.clone()))?;

    let set = build_rrule_set(master, rrule_raw)?;
    let expand_from = if rule_is_finite(rrule_raw) {
        master.start.utc
    } else {
        (cfg.now - chrono::Duration::days(7)).max(master.start.utc)
    };

    let duration = master.duration();
    let started = Instant::now();
    let mut out = Expansion::default();
    let mut scanned = 0usize;

    let occurrences = occurrence_stream(set, cfg.yield_every);
    pin_mut!(occurrences);

    while let Some(occurrence) = occurrences.next().await {
        scanned += 1;
        if started.elapsed() > cfg.time_budget {
            out.budget_exceeded = true;
            out.warnings.push(format!(
                "expansion budget exceeded for {} after {} instances",
                master.uid,
                out.instances.len()
            ));
            break;
        }
        if scanned > cfg.max_scan_iterations {
            out.budget_exceeded = true;
            out.warnings.push(format!(
                "expansion iteration guard tripped for {}",
                master.uid
            ));
            break;
        }

        let start_utc = occurrence.with_timezone(&Utc);
        if start_utc > cfg.window_end {
            break;
        }
        if start_utc < expand_from {
            continue;
        }
        if is_suppressed(start_utc, suppress, cfg.suppress_tolerance) {
            continue;
        }

        let end_local = occurrence + duration;
        out.instances.push(CalendarEvent {
            id: CalendarEvent::instance_id(&master.uid, start_utc),
            uid: master.uid.clone(),
            start: EventDateTime {
                wall: occurrence.naive_local(),
                tz: master.start.tz.clone(),
                utc: start_utc,
            },
            end: EventDateTime {
                wall: end_local.naive_local(),
                tz: master.end.tz.clone(),
                utc: start_utc + duration,
            },
            is_expanded_instance: true,
            rrule_master_uid: Some(master.uid.clone()),
            rrule_raw: None,
            exdates_raw: Vec::new(),
            recurrence_id: None,
            expansion_failed: false,
            ..master.clone()
        });

        if out.instances.len() >= cfg.occurrence_cap {
            out.cap_reached = true;
            out.warnings.push(format!(
                "occurrence cap ({}) reached for {}",
                cfg.occurrence_cap, master.uid
            ));
            break;
        }
    }

    debug!(
        uid = %master.uid,
        instances = out.instances.len(),
        scanned,
        capped = out.cap_reached,
        "expanded recurring master"
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Lazy occurrence producer
// ---------------------------------------------------------------------------

/// All occurrences of the rule set, in order, yielding to the scheduler
/// every `yield_every` items.  Dropping the stream cancels the producer at
/// its next suspension point.
fn occurrence_stream(
    set: RRuleSet,
    yield_every: usize,
) -> impl Stream<Item = DateTime<rrule::Tz>> {
    let yield_every = yield_every.max(1);
    stream! {
        let mut produced = 0usize;
        for occurrence in &set {
            if produced > 0 && produced % yield_every == 0 {
                tokio::task::yield_now().await;
            }
            produced += 1;
            yield occurrence;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_rrule_set(master: &CalendarEvent, rrule_raw: &str) -> Result<RRuleSet, ExpandError> {
    let dtstart = if master.start.tz == "UTC" {
        format!("DTSTART:{}Z", master.start.wall.format("%Y%m%dT%H%M%S"))
    } else {
        format!(
            "DTSTART;TZID={}:{}",
            master.start.tz,
            master.start.wall.format("%Y%m%dT%H%M%S")
        )
    };
    let source = format!("{}\nRRULE:{}", dtstart, rrule_raw);
    source.parse::<RRuleSet>().map_err(|e| {
        warn!(uid = %master.uid, error = %e, "RRULE rejected");
        ExpandError::RRuleParse {
            uid: master.uid.clone(),
            message: e.to_string(),
        }
    })
}

/// A rule without COUNT or UNTIL recurs forever.
fn rule_is_finite(rrule_raw: &str) -> bool {
    let upper = rrule_raw.to_ascii_uppercase();
    upper.contains("COUNT=") || upper.contains("UNTIL=")
}

fn is_suppressed(
    start: DateTime<Utc>,
    suppress: &[DateTime<Utc>],
    tolerance: chrono::Duration,
) -> bool {
    suppress
        .iter()
        .any(|s| (start - *s).abs() <= tolerance)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
