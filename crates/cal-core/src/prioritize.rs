//! Event filtering and "next meeting" selection.
//!
//! The filter is mechanical: future, not cancelled, not skipped.  The
//! prioritizer encodes the business rules for what a voice query means by
//! "my next meeting":
//!
//! - focus-time blocks are not meetings;
//! - among near-simultaneous starts (within 30 minutes of the nearest),
//!   a business meeting beats a lunch;
//! - ties break by earliest start, then subject.
//!
//! The focus/lunch keyword sets are host-provided data, not code — the
//! defaults below are a starting set, not a contract.

use chime_protocol::CalendarEvent;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Keyword sets and grouping window driving [`pick_next`].
#[derive(Debug, Clone)]
pub struct PrioritizerRules {
    /// Subjects matching any of these (case-insensitive substring) are
    /// focus-time and never chosen as "next".
    pub focus_keywords: Vec<String>,
    /// Subjects matching any of these are lunch-categorized.
    pub lunch_keywords: Vec<String>,
    /// Width of the near-simultaneous grouping window.
    pub group_window: chrono::Duration,
}

impl Default for PrioritizerRules {
    fn default() -> Self {
        PrioritizerRules {
            focus_keywords: vec![
                "focus time".to_owned(),
                "focus:".to_owned(),
                "deep work".to_owned(),
            ],
            lunch_keywords: vec!["lunch".to_owned()],
            group_window: chrono::Duration::minutes(30),
        }
    }
}

impl PrioritizerRules {
    fn is_focus(&self, event: &CalendarEvent) -> bool {
        let subject = event.subject.to_lowercase();
        self.focus_keywords.iter().any(|k| subject.contains(k))
    }

    fn is_lunch(&self, event: &CalendarEvent) -> bool {
        let subject = event.subject.to_lowercase();
        self.lunch_keywords.iter().any(|k| subject.contains(k))
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Keep events that are still relevant at `now`: not ended, not cancelled,
/// not skipped by the user.
pub fn filter_upcoming<F>(
    events: Vec<CalendarEvent>,
    now: DateTime<Utc>,
    is_skipped: F,
) -> Vec<CalendarEvent>
where
    F: Fn(&str) -> bool,
{
    events
        .into_iter()
        .filter(|e| e.end.utc > now && !e.is_cancelled && !is_skipped(&e.id))
        .collect()
}

// ---------------------------------------------------------------------------
// Prioritizer
// ---------------------------------------------------------------------------

/// Whether the chosen event is upcoming or already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextMeetingCategory {
    Upcoming,
    Active,
}

/// The prioritizer's answer: one event plus its countdown.
#[derive(Debug, Clone)]
pub struct NextMeeting {
    pub event: CalendarEvent,
    /// Negative when the meeting is in progress.
    pub seconds_until_start: i64,
    pub category: NextMeetingCategory,
}

/// Pick the single "next" meeting from an already-filtered window.
///
/// Candidates are timed, non-free, non-focus events that have not ended.
/// When nothing is upcoming but a candidate is in progress, that candidate
/// is returned as `Active` with a negative countdown.
pub fn pick_next(
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    rules: &PrioritizerRules,
) -> Option<NextMeeting> {
    let candidates: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| {
            !e.is_all_day
                && !e.expansion_failed
                && e.status.is_blocking()
                && !e.is_cancelled
                && e.end.utc > now
                && !rules.is_focus(e)
        })
        .collect();

    let nearest_upcoming = candidates
        .iter()
        .filter(|e| e.start.utc >= now)
        .map(|e| e.start.utc)
        .min();

    let chosen: &CalendarEvent = match nearest_upcoming {
        Some(t) => {
            let horizon = t + rules.group_window;
            let mut group: Vec<&CalendarEvent> = candidates
                .iter()
                .copied()
                .filter(|e| e.start.utc >= t && e.start.utc <= horizon)
                .collect();
            // Business beats lunch when both kinds are in the group.
            if group.iter().any(|e| !rules.is_lunch(e)) && group.iter().any(|e| rules.is_lunch(e)) {
                group.retain(|e| !rules.is_lunch(e));
            }
            group.sort_by(|a, b| {
                a.start
                    .utc
                    .cmp(&b.start.utc)
                    .then_with(|| a.subject.cmp(&b.subject))
            });
            *group.first()?
        }
        // Nothing upcoming: fall back to the most recently started
        // in-progress candidate.
        None => candidates
            .iter()
            .copied()
            .filter(|e| e.is_active_at(now))
            .max_by_key(|e| e.start.utc)?,
    };

    let seconds_until_start = (chosen.start.utc - now).num_seconds();
    Some(NextMeeting {
        event: (*chosen).clone(),
        seconds_until_start,
        category: if seconds_until_start < 0 {
            NextMeetingCategory::Active
        } else {
            NextMeetingCategory::Upcoming
        },
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
