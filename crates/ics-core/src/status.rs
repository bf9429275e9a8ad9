//! Availability status mapping.
//!
//! Feeds disagree about what "this event does not block time" looks like:
//! standard STATUS/TRANSP, vendor busy-status extensions, deletion markers
//! for phantom events still present in the feed, and "Following:" follow-up
//! subjects.  The rules below are priority-ordered and the first match
//! wins; vendor markers dominate because a vendor-deleted event must read
//! as free no matter what its standard properties claim.
//!
//! Marker property names are data, not code — extend [`StatusRules`] when
//! a new producer shows up.

use chime_protocol::EventStatus;

// ---------------------------------------------------------------------------
// Rules tables
// ---------------------------------------------------------------------------

/// Vendor marker names and the follow-up subject heuristic.
#[derive(Debug, Clone)]
pub struct StatusRules {
    /// Properties whose value `TRUE` marks a phantom-deleted event.
    pub deleted_markers: Vec<String>,
    /// Properties carrying a vendor busy status (FREE, TENTATIVE, OOF,
    /// WORKINGELSEWHERE, BUSY).  First present marker wins.
    pub busy_status_markers: Vec<String>,
    /// Subject prefixes identifying follow-up entries.  Empty disables the
    /// heuristic entirely.
    pub follow_up_prefixes: Vec<String>,
}

impl Default for StatusRules {
    fn default() -> Self {
        StatusRules {
            deleted_markers: vec![
                "X-OUTLOOK-DELETED".to_owned(),
                "X-MICROSOFT-CDO-DELETED".to_owned(),
            ],
            busy_status_markers: vec![
                "X-MICROSOFT-CDO-BUSYSTATUS".to_owned(),
                "X-MICROSOFT-CDO-INTENDEDSTATUS".to_owned(),
            ],
            follow_up_prefixes: vec!["Following:".to_owned()],
        }
    }
}

impl StatusRules {
    pub fn is_follow_up(&self, subject: &str) -> bool {
        let subject = subject.trim_start();
        self.follow_up_prefixes
            .iter()
            .any(|p| subject.len() >= p.len() && subject[..p.len()].eq_ignore_ascii_case(p))
    }
}

// ---------------------------------------------------------------------------
// Mapping input and function
// ---------------------------------------------------------------------------

/// The status-relevant facts extracted from a VEVENT.
#[derive(Debug, Clone, Default)]
pub struct StatusInput {
    /// Any deleted-marker property present with value TRUE.
    pub vendor_deleted: bool,
    /// Value of the first busy-status marker present, upper-cased.
    pub vendor_busy_status: Option<String>,
    /// Standard STATUS value, upper-cased.
    pub status: Option<String>,
    /// Standard TRANSP value, upper-cased.
    pub transparency: Option<String>,
    pub subject: String,
}

/// Priority-ordered mapping; first match wins.
pub fn map_status(input: &StatusInput, rules: &StatusRules) -> EventStatus {
    let follow_up = rules.is_follow_up(&input.subject);
    let busy = input.vendor_busy_status.as_deref();
    let status = input.status.as_deref();
    let transparent = input
        .transparency
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("TRANSPARENT"));

    // 1. Vendor deletion marker: phantom event, never blocks time.
    if input.vendor_deleted {
        return EventStatus::Free;
    }
    // 2/3. Vendor FREE splits on the follow-up heuristic.
    if busy.is_some_and(|b| b.eq_ignore_ascii_case("FREE")) {
        return if follow_up {
            EventStatus::Tentative
        } else {
            EventStatus::Free
        };
    }
    // 4. Standard cancellation.
    if status.is_some_and(|s| s.eq_ignore_ascii_case("CANCELLED")) {
        return EventStatus::Free;
    }
    // 5. Standard tentative.
    if status.is_some_and(|s| s.eq_ignore_ascii_case("TENTATIVE")) {
        return EventStatus::Tentative;
    }
    // 6/7. Transparency.
    if transparent {
        return if status.is_some_and(|s| s.eq_ignore_ascii_case("CONFIRMED")) {
            EventStatus::Tentative
        } else {
            EventStatus::Free
        };
    }
    // Vendor non-FREE busy states map through.
    if let Some(b) = busy {
        if b.eq_ignore_ascii_case("OOF") {
            return EventStatus::OutOfOffice;
        }
        if b.eq_ignore_ascii_case("WORKINGELSEWHERE") {
            return EventStatus::WorkingElsewhere;
        }
        if b.eq_ignore_ascii_case("TENTATIVE") {
            return EventStatus::Tentative;
        }
    }
    // 8. Follow-up subjects are tentative even without vendor markers.
    if follow_up {
        return EventStatus::Tentative;
    }
    EventStatus::Busy
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
