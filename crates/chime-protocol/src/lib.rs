// chime-protocol: Shared calendar value types and JSON wire types.
//
// Everything that crosses a process or module boundary lives here: the
// published `CalendarEvent` model, the event window, health snapshots, and
// the voice/kiosk response payloads.  All wire types serialize with serde
// and are frozen once a field ships.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event timestamps
// ---------------------------------------------------------------------------

/// A calendar instant: the wall-clock value as written in the feed, the IANA
/// timezone it is interpreted in, and the derived UTC instant.
///
/// The UTC instant is authoritative for ordering and filtering; the
/// wall-clock + zone pair is authoritative for rendering and for recurrence
/// expansion (which must preserve wall-clock across DST transitions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDateTime {
    /// Naive wall-clock value as parsed from the feed.
    pub wall: NaiveDateTime,
    /// IANA zone identifier the wall-clock is interpreted in, e.g.
    /// `"America/Los_Angeles"`.  `"UTC"` for `Z`-suffixed values.
    pub tz: String,
    /// Derived UTC instant.
    pub utc: DateTime<Utc>,
}

impl EventDateTime {
    /// Build from an already-resolved UTC instant (wall == UTC wall-clock).
    pub fn from_utc(utc: DateTime<Utc>) -> Self {
        EventDateTime {
            wall: utc.naive_utc(),
            tz: "UTC".to_owned(),
            utc,
        }
    }

    /// The local calendar date of this instant (in its own zone).
    pub fn local_date(&self) -> NaiveDate {
        self.wall.date()
    }
}

// ---------------------------------------------------------------------------
// Status and attendees
// ---------------------------------------------------------------------------

/// Effective availability status after the priority-ordered mapping of
/// standard STATUS/TRANSP and vendor busy-status markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Busy,
    Free,
    Tentative,
    OutOfOffice,
    WorkingElsewhere,
}

impl EventStatus {
    /// Whether this status blocks the owner's time.  `free` events never
    /// count towards "next meeting" or "done for day".
    pub fn is_blocking(self) -> bool {
        !matches!(self, EventStatus::Free)
    }
}

/// ROLE parameter of an ATTENDEE line, reduced to what the assistant uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeType {
    Required,
    Optional,
    Resource,
}

/// PARTSTAT parameter of an ATTENDEE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeResponse {
    Accepted,
    Declined,
    Tentative,
    NeedsAction,
    Delegated,
}

/// One parsed ATTENDEE record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub attendee_type: AttendeeType,
    pub response_status: AttendeeResponse,
}

// ---------------------------------------------------------------------------
// CalendarEvent
// ---------------------------------------------------------------------------

/// An immutable calendar event instance.
///
/// For plain events `id == uid`.  For instances synthesized from an RRULE
/// master, `id` is `"<uid>:<start-utc RFC3339>"` so every occurrence has a
/// distinct identity, and `rrule_master_uid` points back at the master.
///
/// Invariants (enforced at construction sites, relied on everywhere):
/// - `end.utc >= start.utc`
/// - all-day events align to date boundaries in the event's zone
/// - `is_expanded_instance` implies `rrule_master_uid.is_some()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Unique instance identifier.
    pub id: String,
    /// Feed UID; shared between a recurring master, its expanded instances,
    /// and its RECURRENCE-ID overrides.
    pub uid: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub is_all_day: bool,
    pub status: EventStatus,
    pub is_cancelled: bool,
    pub is_organizer: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,

    // Recurrence facet.
    pub is_recurring: bool,
    /// Original instant of the occurrence this event replaces (from the
    /// RECURRENCE-ID property), when this event is a moved/modified instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<DateTime<Utc>>,
    pub is_expanded_instance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule_master_uid: Option<String>,
    /// Raw RRULE value for the expander; not meaningful after expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule_raw: Option<String>,
    /// Original EXDATE content lines (kept whole so TZID parameters
    /// survive until expansion).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exdates_raw: Vec<String>,
    /// Set on recurring masters whose expansion failed; listings skip these
    /// but they are retained for diagnostics.
    #[serde(default)]
    pub expansion_failed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    pub is_online_meeting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_meeting_url: Option<String>,
}

impl CalendarEvent {
    /// Event duration.  Non-negative by the `end >= start` invariant.
    pub fn duration(&self) -> chrono::Duration {
        self.end.utc - self.start.utc
    }

    /// True if the event is in progress at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start.utc <= now && now < self.end.utc
    }

    /// True if the event has not ended at `now`.
    pub fn is_upcoming_or_active_at(&self, now: DateTime<Utc>) -> bool {
        self.end.utc > now
    }

    /// Identity for an expanded instance of `master_uid` starting at `start`.
    pub fn instance_id(master_uid: &str, start_utc: DateTime<Utc>) -> String {
        format!("{}:{}", master_uid, start_utc.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// EventWindow
// ---------------------------------------------------------------------------

/// The published set of upcoming events plus its monotonic version.
///
/// Owned by the window publisher; shared read-only with every handler.  A
/// reader always observes a complete window — the publisher swaps the whole
/// value atomically and never mutates a published window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWindow {
    /// Events ordered by `start.utc`, then subject.
    pub events: Vec<CalendarEvent>,
    /// Monotonically increasing; bumped on every successful publish.
    pub version: u64,
    /// Instant the window was installed.
    pub published_at: DateTime<Utc>,
}

impl EventWindow {
    /// The empty pre-first-refresh window (version 0).
    pub fn empty(now: DateTime<Utc>) -> Self {
        EventWindow {
            events: Vec::new(),
            version: 0,
            published_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Overall service health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Critical,
}

/// Point-in-time health report served by `/healthz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    pub event_count: u64,
    /// Last background-loop heartbeat; staleness here means the refresh
    /// task is wedged even if the last refresh succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<DateTime<Utc>>,
    pub last_probe_ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub status: HealthStatus,
}

// ---------------------------------------------------------------------------
// Fetch results
// ---------------------------------------------------------------------------

/// A fetched ICS document plus the caching hints needed for conditional
/// refetch.  `status` is the HTTP status the body was served with (200, or
/// 304 when the body was re-served from the validator cache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIcsResponse {
    pub body: Vec<u8>,
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

// ---------------------------------------------------------------------------
// Voice / kiosk wire types
// ---------------------------------------------------------------------------

/// Compact event rendering embedded in voice and kiosk payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingJson {
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub is_all_day: bool,
    pub is_online_meeting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_meeting_url: Option<String>,
}

impl From<&CalendarEvent> for MeetingJson {
    fn from(event: &CalendarEvent) -> Self {
        MeetingJson {
            subject: event.subject.clone(),
            start: event.start.utc,
            end: event.end.utc,
            location: event.location.clone(),
            is_all_day: event.is_all_day,
            is_online_meeting: event.is_online_meeting,
            online_meeting_url: event.online_meeting_url.clone(),
        }
    }
}

/// `GET /api/alexa/next-meeting`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextMeetingResponse {
    pub speech_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting: Option<MeetingJson>,
    /// Negative when the chosen meeting is already in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_until_start: Option<i64>,
    /// Human rendering of the countdown, e.g. "in 25 minutes".
    pub duration_spoken: String,
}

/// `GET /api/alexa/time-until-next`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeUntilNextResponse {
    pub speech_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_until_start: Option<i64>,
    pub duration_spoken: String,
}

/// `GET /api/alexa/done-for-day`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneForDayResponse {
    pub speech_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    /// Latest end among today's remaining blocking events, in the caller's
    /// zone; absent when the day is already clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_meeting_end: Option<DateTime<Utc>>,
    pub timezone: String,
}

/// `GET /api/alexa/launch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSummaryResponse {
    pub speech_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    pub meetings_remaining_today: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_meeting: Option<MeetingJson>,
}

/// How busy a morning looks, bucketed for speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityBucket {
    Clear,
    Light,
    Moderate,
    Busy,
    BackToBack,
}

/// One per-meeting insight line in the morning summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingInsight {
    pub subject: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub is_online_meeting: bool,
    /// True when this meeting starts within 5 minutes of the previous
    /// meeting's end.
    pub back_to_back: bool,
}

/// A gap between meetings inside the summarized timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeBlock {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: i64,
}

/// `GET /api/alexa/morning-summary` and `GET /api/morning-summary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorningSummaryResponse {
    pub speech_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    pub timeframe_start: DateTime<Utc>,
    pub timeframe_end: DateTime<Utc>,
    pub total_meetings: u32,
    pub density: DensityBucket,
    pub back_to_back_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<MeetingInsight>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub free_blocks: Vec<FreeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_wake_up: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// HTTP error envelope
// ---------------------------------------------------------------------------

/// Error body for non-2xx API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
