//! DATE, DATE-TIME and DURATION value parsing.
//!
//! Handles the three RFC 5545 date-time forms (UTC with `Z`, zoned via a
//! `TZID` parameter, and floating) plus bare DATE values for all-day
//! events.  Zone labels go through the shared [`TimezoneResolver`] so
//! Windows display names and legacy aliases work here too.

use cal_core::TimezoneResolver;
use chime_protocol::EventDateTime;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::property::Property;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateTimeError {
    #[error("unparseable date-time value '{0}'")]
    BadFormat(String),
}

/// Parse a DTSTART/DTEND/RECURRENCE-ID style property.
///
/// Returns the resolved instant and whether the value was a bare DATE
/// (which marks the event all-day).
pub fn parse_date_time(
    prop: &Property,
    resolver: &TimezoneResolver,
) -> Result<(EventDateTime, bool), DateTimeError> {
    let value = prop.value.trim();
    let is_date = prop
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| DateTimeError::BadFormat(value.to_owned()))?;
        let wall = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| DateTimeError::BadFormat(value.to_owned()))?;
        let tz = match prop.param("TZID") {
            Some(label) => resolver.resolve(label),
            None => resolver.default_zone(),
        };
        let utc = resolver.resolve_local(wall, None, tz);
        return Ok((
            EventDateTime {
                wall,
                tz: tz.name().to_owned(),
                utc,
            },
            true,
        ));
    }

    parse_date_time_value(value, prop.param("TZID"), resolver).map(|edt| (edt, false))
}

/// Parse one DATE-TIME value with an optional TZID from the enclosing
/// property.
pub fn parse_date_time_value(
    value: &str,
    tzid: Option<&str>,
    resolver: &TimezoneResolver,
) -> Result<EventDateTime, DateTimeError> {
    let value = value.trim();

    if let Some(stripped) = value.strip_suffix(['Z', 'z']) {
        let wall = parse_naive(stripped)?;
        return Ok(EventDateTime {
            wall,
            tz: "UTC".to_owned(),
            utc: Utc.from_utc_datetime(&wall),
        });
    }

    let wall = parse_naive(value)?;
    let tz = match tzid {
        Some(label) => resolver.resolve(label),
        None => resolver.default_zone(),
    };
    let utc = resolver.resolve_local(wall, None, tz);
    Ok(EventDateTime {
        wall,
        tz: tz.name().to_owned(),
        utc,
    })
}

fn parse_naive(value: &str) -> Result<NaiveDateTime, DateTimeError> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|_| DateTimeError::BadFormat(value.to_owned()))
}

/// Parse every instant on an EXDATE content line.  Individual bad values
/// are skipped — one typo must not void the rest of the exception list.
pub fn parse_exdate_line(line: &str, resolver: &TimezoneResolver) -> Vec<DateTime<Utc>> {
    let Some(prop) = Property::parse(line) else {
        return Vec::new();
    };
    let tzid = prop.param("TZID").map(str::to_owned);
    let value_is_date = prop
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    prop.value
        .split(',')
        .filter_map(|raw| {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            if value_is_date || (raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit())) {
                let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
                let wall = date.and_hms_opt(0, 0, 0)?;
                let tz = match tzid.as_deref() {
                    Some(label) => resolver.resolve(label),
                    None => resolver.default_zone(),
                };
                return Some(resolver.resolve_local(wall, None, tz));
            }
            parse_date_time_value(raw, tzid.as_deref(), resolver)
                .ok()
                .map(|edt| edt.utc)
        })
        .collect()
}

/// Parse an RFC 5545 DURATION (`[+/-]P[nW][nD][T[nH][nM][nS]]`).
pub fn parse_duration(value: &str) -> Option<chrono::Duration> {
    let value = value.trim();
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let rest = rest.strip_prefix(['P', 'p'])?;

    let mut seconds: i64 = 0;
    let mut number = String::new();
    let mut in_time = false;
    for ch in rest.chars() {
        match ch {
            'T' | 't' => in_time = true,
            '0'..='9' => number.push(ch),
            'W' | 'w' => seconds += number.parse::<i64>().ok()? * 7 * 86_400,
            'D' | 'd' => seconds += number.parse::<i64>().ok()? * 86_400,
            'H' | 'h' if in_time => seconds += number.parse::<i64>().ok()? * 3_600,
            'M' | 'm' if in_time => seconds += number.parse::<i64>().ok()? * 60,
            'S' | 's' if in_time => seconds += number.parse::<i64>().ok()?,
            _ => return None,
        }
        if !ch.is_ascii_digit() && ch != 'T' && ch != 't' {
            number.clear();
        }
    }
    if !number.is_empty() {
        // Trailing digits without a unit designator.
        return None;
    }

    Some(if negative {
        chrono::Duration::seconds(-seconds)
    } else {
        chrono::Duration::seconds(seconds)
    })
}

/// Parse CREATED / LAST-MODIFIED style stamps (UTC, `Z`-suffixed; a
/// missing suffix is tolerated and read as UTC).
pub fn parse_utc_stamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let stripped = value.strip_suffix(['Z', 'z']).unwrap_or(value);
    if let Ok(wall) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
        return Some(Utc.from_utc_datetime(&wall));
    }
    NaiveDate::parse_from_str(stripped, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|wall| Utc.from_utc_datetime(&wall))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
