//! VEVENT block → `CalendarEvent` mapping.
//!
//! Input is the unfolded logical lines between `BEGIN:VEVENT` and
//! `END:VEVENT` (inclusive of nested components such as VALARM, which are
//! skipped here).  Output is an event skeleton: recurrence is carried as
//! raw RRULE/EXDATE strings for the expander, and the availability status
//! is already mapped through the priority table.

use cal_core::TimezoneResolver;
use chime_protocol::{
    Attendee, AttendeeResponse, AttendeeType, CalendarEvent, EventDateTime, EventStatus,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::datetime::{self, DateTimeError};
use crate::property::Property;
use crate::status::{StatusInput, StatusRules, map_status};

/// Max characters of DESCRIPTION kept as the body preview.
const BODY_PREVIEW_CHARS: usize = 256;

/// Microsoft-hosted conferencing URL fragments.
const MEETING_URL_PATTERNS: &[&str] = &[
    "teams.microsoft.com/l/meetup-join",
    "teams.live.com/meet",
    "meet.lync.com",
    "join.skype.com",
];

// ---------------------------------------------------------------------------
// Context and errors
// ---------------------------------------------------------------------------

/// Shared parse context for one stream.
#[derive(Debug, Clone)]
pub struct VeventContext<'a> {
    pub resolver: &'a TimezoneResolver,
    pub status_rules: &'a StatusRules,
    /// The calendar owner's address; ORGANIZER lines matching it mark
    /// `is_organizer`.
    pub user_email: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum VeventError {
    #[error("VEVENT missing UID")]
    MissingUid,
    #[error("VEVENT {uid} missing DTSTART")]
    MissingStart { uid: String },
    #[error("VEVENT {uid}: {source}")]
    BadDate {
        uid: String,
        #[source]
        source: DateTimeError,
    },
}

// ---------------------------------------------------------------------------
// Block parsing
// ---------------------------------------------------------------------------

/// Map one VEVENT block.  `lines` excludes the BEGIN/END markers.
pub fn parse_event_block(
    lines: &[String],
    ctx: &VeventContext<'_>,
) -> Result<CalendarEvent, VeventError> {
    let mut uid = None;
    let mut summary = None;
    let mut dtstart = None;
    let mut dtend = None;
    let mut duration = None;
    let mut location = None;
    let mut description = None;
    let mut attendees = Vec::new();
    let mut organizer_email = None;
    let mut rrule = None;
    let mut exdate_lines = Vec::new();
    let mut recurrence_id_prop = None;
    let mut created_at = None;
    let mut modified_at = None;
    let mut status_raw = None;
    let mut transparency = None;
    let mut vendor_deleted = false;
    let mut vendor_busy_status = None;

    // Skip nested components (VALARM etc.) wholesale.
    let mut depth = 0usize;
    for line in lines {
        let Some(prop) = Property::parse(line) else {
            continue;
        };
        match prop.name.as_str() {
            "BEGIN" => {
                depth += 1;
                continue;
            }
            "END" => {
                depth = depth.saturating_sub(1);
                continue;
            }
            _ if depth > 0 => continue,
            _ => {}
        }

        match prop.name.as_str() {
            "UID" => uid = Some(prop.value.trim().to_owned()),
            "SUMMARY" => summary = Some(prop.text_value()),
            "DTSTART" => dtstart = Some(prop),
            "DTEND" => dtend = Some(prop),
            "DURATION" => duration = datetime::parse_duration(&prop.value),
            "LOCATION" => {
                let text = prop.text_value();
                if !text.trim().is_empty() {
                    location = Some(text);
                }
            }
            "DESCRIPTION" => description = Some(prop.text_value()),
            "ATTENDEE" => attendees.push(parse_attendee(&prop)),
            "ORGANIZER" => organizer_email = extract_mailto(&prop),
            "RRULE" => rrule = Some(prop.value.trim().to_owned()),
            "EXDATE" => exdate_lines.push(line.clone()),
            "RECURRENCE-ID" => recurrence_id_prop = Some(prop),
            "CREATED" => created_at = datetime::parse_utc_stamp(&prop.value),
            "LAST-MODIFIED" => modified_at = datetime::parse_utc_stamp(&prop.value),
            "STATUS" => status_raw = Some(prop.value.trim().to_ascii_uppercase()),
            "TRANSP" => transparency = Some(prop.value.trim().to_ascii_uppercase()),
            name => {
                if ctx
                    .status_rules
                    .deleted_markers
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(name))
                {
                    vendor_deleted |= prop.value.trim().eq_ignore_ascii_case("TRUE");
                } else if vendor_busy_status.is_none()
                    && ctx
                        .status_rules
                        .busy_status_markers
                        .iter()
                        .any(|m| m.eq_ignore_ascii_case(name))
                {
                    vendor_busy_status = Some(prop.value.trim().to_ascii_uppercase());
                }
            }
        }
    }

    let uid = uid.filter(|u| !u.is_empty()).ok_or(VeventError::MissingUid)?;
    let dtstart = dtstart.ok_or_else(|| VeventError::MissingStart { uid: uid.clone() })?;
    let (start, is_all_day) =
        datetime::parse_date_time(&dtstart, ctx.resolver).map_err(|source| {
            VeventError::BadDate {
                uid: uid.clone(),
                source,
            }
        })?;

    let end = resolve_end(&uid, &start, is_all_day, dtend.as_ref(), duration, ctx)?;

    let recurrence_id = match recurrence_id_prop {
        Some(prop) => Some(
            datetime::parse_date_time(&prop, ctx.resolver)
                .map_err(|source| VeventError::BadDate {
                    uid: uid.clone(),
                    source,
                })?
                .0
                .utc,
        ),
        None => None,
    };

    let subject = summary.unwrap_or_default();
    let status = map_status(
        &StatusInput {
            vendor_deleted,
            vendor_busy_status,
            status: status_raw.clone(),
            transparency,
            subject: subject.clone(),
        },
        ctx.status_rules,
    );
    let is_cancelled = status_raw.as_deref() == Some("CANCELLED");

    let online_meeting_url = detect_meeting_url(
        [location.as_deref(), description.as_deref()]
            .into_iter()
            .flatten(),
    );

    let is_organizer = match (&organizer_email, ctx.user_email) {
        (Some(org), Some(user)) => org.eq_ignore_ascii_case(user),
        _ => false,
    };

    // Overrides get a distinct id so a skipped override never shadows its
    // master (and vice versa).
    let id = match recurrence_id {
        Some(original) => format!("{}:{}", uid, original.to_rfc3339()),
        None => uid.clone(),
    };

    Ok(CalendarEvent {
        id,
        uid,
        subject,
        body_preview: description.map(|d| truncate_chars(&d, BODY_PREVIEW_CHARS)),
        location,
        is_all_day,
        status,
        is_cancelled,
        is_organizer,
        attendees,
        is_recurring: rrule.is_some() || recurrence_id.is_some(),
        recurrence_id,
        is_expanded_instance: false,
        rrule_master_uid: None,
        rrule_raw: rrule,
        exdates_raw: exdate_lines,
        expansion_failed: false,
        created_at,
        modified_at,
        is_online_meeting: online_meeting_url.is_some(),
        online_meeting_url,
        start,
        end,
    })
}

fn resolve_end(
    uid: &str,
    start: &EventDateTime,
    is_all_day: bool,
    dtend: Option<&Property>,
    duration: Option<chrono::Duration>,
    ctx: &VeventContext<'_>,
) -> Result<EventDateTime, VeventError> {
    let default_duration = if is_all_day {
        chrono::Duration::days(1)
    } else {
        chrono::Duration::hours(1)
    };

    let end = match dtend {
        Some(prop) => {
            let (end, _) =
                datetime::parse_date_time(prop, ctx.resolver).map_err(|source| {
                    VeventError::BadDate {
                        uid: uid.to_owned(),
                        source,
                    }
                })?;
            end
        }
        None => {
            let dur = duration.unwrap_or(default_duration);
            EventDateTime {
                wall: start.wall + dur,
                tz: start.tz.clone(),
                utc: start.utc + dur,
            }
        }
    };

    // A feed claiming end < start gets the default duration instead.
    if end.utc < start.utc {
        debug!(uid, "DTEND before DTSTART, applying default duration");
        return Ok(EventDateTime {
            wall: start.wall + default_duration,
            tz: start.tz.clone(),
            utc: start.utc + default_duration,
        });
    }
    Ok(end)
}

// ---------------------------------------------------------------------------
// Attendees and organizer
// ---------------------------------------------------------------------------

fn parse_attendee(prop: &Property) -> Attendee {
    let attendee_type = if prop
        .param("CUTYPE")
        .is_some_and(|c| c.eq_ignore_ascii_case("RESOURCE") || c.eq_ignore_ascii_case("ROOM"))
        || prop
            .param("ROLE")
            .is_some_and(|r| r.eq_ignore_ascii_case("NON-PARTICIPANT"))
    {
        AttendeeType::Resource
    } else if prop
        .param("ROLE")
        .is_some_and(|r| r.eq_ignore_ascii_case("OPT-PARTICIPANT"))
    {
        AttendeeType::Optional
    } else {
        AttendeeType::Required
    };

    let response_status = match prop.param("PARTSTAT").map(str::to_ascii_uppercase).as_deref() {
        Some("ACCEPTED") => AttendeeResponse::Accepted,
        Some("DECLINED") => AttendeeResponse::Declined,
        Some("TENTATIVE") => AttendeeResponse::Tentative,
        Some("DELEGATED") => AttendeeResponse::Delegated,
        _ => AttendeeResponse::NeedsAction,
    };

    Attendee {
        display_name: prop.param("CN").map(str::to_owned),
        email: extract_mailto(prop).or_else(|| prop.param("EMAIL").map(str::to_owned)),
        attendee_type,
        response_status,
    }
}

fn extract_mailto(prop: &Property) -> Option<String> {
    let value = prop.value.trim();
    value
        .strip_prefix("mailto:")
        .or_else(|| value.strip_prefix("MAILTO:"))
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Online-meeting detection
// ---------------------------------------------------------------------------

/// Find the first Microsoft-hosted conferencing URL in the given texts.
fn detect_meeting_url<'a>(texts: impl Iterator<Item = &'a str>) -> Option<String> {
    for text in texts {
        for token in text.split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '\'')) {
            let lowered = token.to_ascii_lowercase();
            if !lowered.starts_with("http") {
                continue;
            }
            if MEETING_URL_PATTERNS.iter().any(|p| lowered.contains(p)) {
                return Some(token.trim_end_matches(['.', ',', ';', ')']).to_owned());
            }
        }
    }
    None
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    s.chars().take(max_chars).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
