//! Spoken phrase construction.
//!
//! These produce the exact strings spoken by the assistant, so wording
//! changes here are user-visible.  Phrases avoid abbreviations ("PM" is
//! fine, "mins" is not) because speech engines read them literally.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Countdown phrase for a meeting `seconds` away.  Negative values mean
/// the meeting already started.
pub fn spoken_countdown(seconds: i64) -> String {
    if seconds < 0 {
        let ago = -seconds;
        if ago < 60 {
            return "just now".to_owned();
        }
        return format!("{} ago", duration_phrase(ago));
    }
    if seconds < 60 {
        return "in under a minute".to_owned();
    }
    format!("in {}", duration_phrase(seconds))
}

/// Length phrase: "45 minutes", "1 hour", "1 hour and 15 minutes".
pub fn spoken_duration_minutes(total_minutes: i64) -> String {
    duration_phrase(total_minutes.max(0) * 60)
}

/// Clock-time phrase in the given zone: "9:05 AM", "12:30 PM".
pub fn spoken_clock_time(instant: DateTime<Utc>, tz: Tz) -> String {
    let local = instant.with_timezone(&tz);
    let (is_pm, hour12) = local.hour12();
    format!(
        "{}:{:02} {}",
        hour12,
        local.minute(),
        if is_pm { "PM" } else { "AM" }
    )
}

fn duration_phrase(total_seconds: i64) -> String {
    let minutes = total_seconds / 60;
    if minutes < 60 {
        return plural(minutes.max(1), "minute");
    }
    let hours = minutes / 60;
    let rem_minutes = minutes % 60;
    if hours < 24 {
        if rem_minutes == 0 {
            return plural(hours, "hour");
        }
        return format!("{} and {}", plural(hours, "hour"), plural(rem_minutes, "minute"));
    }
    let days = hours / 24;
    let rem_hours = hours % 24;
    if rem_hours == 0 {
        return plural(days, "day");
    }
    format!("{} and {}", plural(days, "day"), plural(rem_hours, "hour"))
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn countdown_phrases() {
        assert_eq!(spoken_countdown(30), "in under a minute");
        assert_eq!(spoken_countdown(5 * 60), "in 5 minutes");
        assert_eq!(spoken_countdown(60), "in 1 minute");
        assert_eq!(spoken_countdown(3600), "in 1 hour");
        assert_eq!(spoken_countdown(3600 + 600), "in 1 hour and 10 minutes");
        assert_eq!(spoken_countdown(2 * 86_400), "in 2 days");
        assert_eq!(spoken_countdown(86_400 + 2 * 3600), "in 1 day and 2 hours");
    }

    #[test]
    fn countdown_for_running_meeting() {
        assert_eq!(spoken_countdown(-30), "just now");
        assert_eq!(spoken_countdown(-10 * 60), "10 minutes ago");
    }

    #[test]
    fn durations() {
        assert_eq!(spoken_duration_minutes(45), "45 minutes");
        assert_eq!(spoken_duration_minutes(60), "1 hour");
        assert_eq!(spoken_duration_minutes(75), "1 hour and 15 minutes");
        assert_eq!(spoken_duration_minutes(0), "1 minute");
    }

    #[test]
    fn clock_times() {
        let instant = Utc.with_ymd_and_hms(2025, 11, 5, 17, 5, 0).unwrap();
        assert_eq!(
            spoken_clock_time(instant, chrono_tz::America::New_York),
            "12:05 PM"
        );
        assert_eq!(
            spoken_clock_time(instant, chrono_tz::America::Los_Angeles),
            "9:05 AM"
        );
        let midnight = Utc.with_ymd_and_hms(2025, 11, 5, 5, 0, 0).unwrap();
        assert_eq!(
            spoken_clock_time(midnight, chrono_tz::America::New_York),
            "12:00 AM"
        );
    }
}
