// chime-test-utils: Shared test fixtures for the assistant suite.
//
// Provides an ICS feed builder (so tests read as scenarios, not string
// soup) and a CalendarEvent factory with sane defaults.

use chime_protocol::{CalendarEvent, EventDateTime, EventStatus};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// ICS feed builder
// ---------------------------------------------------------------------------

/// Builds a VCALENDAR document line by line.
///
/// ```
/// use chime_test_utils::IcsBuilder;
/// let feed = IcsBuilder::new()
///     .event(&["UID:a", "SUMMARY:Standup", "DTSTART:20251103T090000Z"])
///     .build();
/// assert!(feed.starts_with("BEGIN:VCALENDAR"));
/// ```
#[derive(Debug, Default)]
pub struct IcsBuilder {
    calendar_lines: Vec<String>,
    events: Vec<Vec<String>>,
}

impl IcsBuilder {
    pub fn new() -> Self {
        IcsBuilder::default()
    }

    /// Add a calendar-level line (e.g. `X-WR-CALNAME:Work`).
    pub fn calendar_line(mut self, line: &str) -> Self {
        self.calendar_lines.push(line.to_owned());
        self
    }

    /// Add one VEVENT from its content lines (without BEGIN/END).
    pub fn event(mut self, lines: &[&str]) -> Self {
        self.events
            .push(lines.iter().map(|s| (*s).to_owned()).collect());
        self
    }

    /// Produce the document with CRLF line endings.
    pub fn build(self) -> String {
        let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//chime-test//EN\r\n");
        for line in &self.calendar_lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        for event in &self.events {
            out.push_str("BEGIN:VEVENT\r\n");
            for line in event {
                out.push_str(line);
                out.push_str("\r\n");
            }
            out.push_str("END:VEVENT\r\n");
        }
        out.push_str("END:VCALENDAR\r\n");
        out
    }
}

/// A UTC DTSTART/DTEND line pair for a timed event.
pub fn utc_lines(start: DateTime<Utc>, end: DateTime<Utc>) -> [String; 2] {
    [
        format!("DTSTART:{}", start.format("%Y%m%dT%H%M%SZ")),
        format!("DTEND:{}", end.format("%Y%m%dT%H%M%SZ")),
    ]
}

// ---------------------------------------------------------------------------
// CalendarEvent factory
// ---------------------------------------------------------------------------

/// A plain busy one-hour event; tweak fields after construction.
pub fn event_at(uid: &str, subject: &str, start: DateTime<Utc>) -> CalendarEvent {
    event_with_duration(uid, subject, start, chrono::Duration::hours(1))
}

pub fn event_with_duration(
    uid: &str,
    subject: &str,
    start: DateTime<Utc>,
    duration: chrono::Duration,
) -> CalendarEvent {
    CalendarEvent {
        id: uid.to_owned(),
        uid: uid.to_owned(),
        subject: subject.to_owned(),
        body_preview: None,
        location: None,
        start: EventDateTime::from_utc(start),
        end: EventDateTime::from_utc(start + duration),
        is_all_day: false,
        status: EventStatus::Busy,
        is_cancelled: false,
        is_organizer: false,
        attendees: vec![],
        is_recurring: false,
        recurrence_id: None,
        is_expanded_instance: false,
        rrule_master_uid: None,
        rrule_raw: None,
        exdates_raw: vec![],
        expansion_failed: false,
        created_at: None,
        modified_at: None,
        is_online_meeting: false,
        online_meeting_url: None,
    }
}
