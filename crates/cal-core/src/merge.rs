//! Master/override merging and deduplication.
//!
//! After per-source expansion there are two event populations: "originals"
//! straight from the parser (plain events, RECURRENCE-ID overrides, and
//! recurring masters that failed to expand) and the expanded instances.
//! An override beats the synthesized occurrence it replaces; everything
//! else is concatenated and deduplicated structurally.
//!
//! Order matters: expanded instances are scanned against overrides first,
//! then the concatenation puts surviving instances ahead of originals so
//! the dedup pass ("first wins") prefers the instance form of a shared
//! occurrence.

use chime_protocol::CalendarEvent;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Merge expanded instances with originals, applying RECURRENCE-ID
/// overrides and deduplicating.
///
/// `tolerance` is the same skew allowance used for EXDATE matching.
pub fn merge_expanded(
    originals: Vec<CalendarEvent>,
    expanded: Vec<CalendarEvent>,
    tolerance: chrono::Duration,
) -> Vec<CalendarEvent> {
    dedup_events(apply_overrides(originals, expanded, tolerance))
}

/// Apply RECURRENCE-ID overrides: drop each expanded instance whose start
/// matches an override's original instant, then concatenate (surviving
/// instances first).
pub fn apply_overrides(
    originals: Vec<CalendarEvent>,
    expanded: Vec<CalendarEvent>,
    tolerance: chrono::Duration,
) -> Vec<CalendarEvent> {
    // UID → override original-instants.
    let mut overrides: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
    for event in &originals {
        if let Some(recurrence_id) = event.recurrence_id {
            overrides
                .entry(event.uid.as_str())
                .or_default()
                .push(recurrence_id);
        }
    }

    let before = expanded.len();
    let mut merged: Vec<CalendarEvent> = expanded
        .into_iter()
        .filter(|instance| {
            let Some(master_uid) = instance.rrule_master_uid.as_deref() else {
                return true;
            };
            match overrides.get(master_uid) {
                Some(instants) => !instants
                    .iter()
                    .any(|t| (instance.start.utc - *t).abs() <= tolerance),
                None => true,
            }
        })
        .collect();
    let overridden = before - merged.len();
    if overridden > 0 {
        debug!(overridden, "expanded instances replaced by overrides");
    }

    merged.extend(originals);
    merged
}

/// Structural dedup: first occurrence of a (UID, subject, start, end,
/// all-day, recurrence-id) tuple wins.  Idempotent.
pub fn dedup_events(events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    let mut seen: HashSet<(String, String, i64, i64, bool, Option<i64>)> = HashSet::new();
    events
        .into_iter()
        .filter(|event| {
            seen.insert((
                event.uid.clone(),
                event.subject.clone(),
                event.start.utc.timestamp(),
                event.end.utc.timestamp(),
                event.is_all_day,
                event.recurrence_id.map(|t| t.timestamp()),
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
