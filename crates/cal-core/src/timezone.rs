//! Timezone resolution and DST correction.
//!
//! Feeds (especially Microsoft-produced ones) name zones three different
//! ways: Windows display names ("Pacific Standard Time"), legacy IANA
//! aliases ("US/Pacific"), and canonical IANA ids.  Resolution order:
//!
//! 1. Windows display name → canonical IANA id (packaged table below)
//! 2. Legacy/deprecated IANA alias → modern id
//! 3. Parse against the platform IANA database (`chrono-tz`)
//! 4. Operator-configured default zone
//!
//! The default zone is operator-defined; it is deliberately NOT `UTC` by
//! default in the service config, because a personal-calendar deployment
//! wants local wall-clock answers even for sloppily-tagged feeds.

use chrono::{DateTime, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use tracing::debug;

// ---------------------------------------------------------------------------
// Windows display name → IANA id
// ---------------------------------------------------------------------------

/// CLDR windowsZones mapping, territory 001 entries.  Kept sorted by the
/// Windows name for readability; looked up case-insensitively.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("AUS Central Standard Time", "Australia/Darwin"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
    ("Afghanistan Standard Time", "Asia/Kabul"),
    ("Alaskan Standard Time", "America/Anchorage"),
    ("Arab Standard Time", "Asia/Riyadh"),
    ("Arabian Standard Time", "Asia/Dubai"),
    ("Arabic Standard Time", "Asia/Baghdad"),
    ("Argentina Standard Time", "America/Buenos_Aires"),
    ("Atlantic Standard Time", "America/Halifax"),
    ("Azerbaijan Standard Time", "Asia/Baku"),
    ("Azores Standard Time", "Atlantic/Azores"),
    ("Bahia Standard Time", "America/Bahia"),
    ("Bangladesh Standard Time", "Asia/Dhaka"),
    ("Belarus Standard Time", "Europe/Minsk"),
    ("Canada Central Standard Time", "America/Regina"),
    ("Cape Verde Standard Time", "Atlantic/Cape_Verde"),
    ("Caucasus Standard Time", "Asia/Yerevan"),
    ("Cen. Australia Standard Time", "Australia/Adelaide"),
    ("Central America Standard Time", "America/Guatemala"),
    ("Central Asia Standard Time", "Asia/Almaty"),
    ("Central Brazilian Standard Time", "America/Cuiaba"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("Central Pacific Standard Time", "Pacific/Guadalcanal"),
    ("Central Standard Time", "America/Chicago"),
    ("Central Standard Time (Mexico)", "America/Mexico_City"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Cuba Standard Time", "America/Havana"),
    ("Dateline Standard Time", "Etc/GMT+12"),
    ("E. Africa Standard Time", "Africa/Nairobi"),
    ("E. Australia Standard Time", "Australia/Brisbane"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("E. South America Standard Time", "America/Sao_Paulo"),
    ("Eastern Standard Time", "America/New_York"),
    ("Eastern Standard Time (Mexico)", "America/Cancun"),
    ("Egypt Standard Time", "Africa/Cairo"),
    ("Ekaterinburg Standard Time", "Asia/Yekaterinburg"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("Fiji Standard Time", "Pacific/Fiji"),
    ("GMT Standard Time", "Europe/London"),
    ("GTB Standard Time", "Europe/Bucharest"),
    ("Georgian Standard Time", "Asia/Tbilisi"),
    ("Greenland Standard Time", "America/Godthab"),
    ("Greenwich Standard Time", "Atlantic/Reykjavik"),
    ("Haiti Standard Time", "America/Port-au-Prince"),
    ("Hawaiian Standard Time", "Pacific/Honolulu"),
    ("India Standard Time", "Asia/Calcutta"),
    ("Iran Standard Time", "Asia/Tehran"),
    ("Israel Standard Time", "Asia/Jerusalem"),
    ("Jordan Standard Time", "Asia/Amman"),
    ("Kaliningrad Standard Time", "Europe/Kaliningrad"),
    ("Korea Standard Time", "Asia/Seoul"),
    ("Libya Standard Time", "Africa/Tripoli"),
    ("Line Islands Standard Time", "Pacific/Kiritimati"),
    ("Magadan Standard Time", "Asia/Magadan"),
    ("Mauritius Standard Time", "Indian/Mauritius"),
    ("Middle East Standard Time", "Asia/Beirut"),
    ("Montevideo Standard Time", "America/Montevideo"),
    ("Morocco Standard Time", "Africa/Casablanca"),
    ("Mountain Standard Time", "America/Denver"),
    ("Mountain Standard Time (Mexico)", "America/Chihuahua"),
    ("Myanmar Standard Time", "Asia/Rangoon"),
    ("N. Central Asia Standard Time", "Asia/Novosibirsk"),
    ("Namibia Standard Time", "Africa/Windhoek"),
    ("Nepal Standard Time", "Asia/Katmandu"),
    ("New Zealand Standard Time", "Pacific/Auckland"),
    ("Newfoundland Standard Time", "America/St_Johns"),
    ("North Asia East Standard Time", "Asia/Irkutsk"),
    ("North Asia Standard Time", "Asia/Krasnoyarsk"),
    ("North Korea Standard Time", "Asia/Pyongyang"),
    ("Pacific SA Standard Time", "America/Santiago"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("Pacific Standard Time (Mexico)", "America/Tijuana"),
    ("Pakistan Standard Time", "Asia/Karachi"),
    ("Paraguay Standard Time", "America/Asuncion"),
    ("Romance Standard Time", "Europe/Paris"),
    ("Russia Time Zone 10", "Asia/Srednekolymsk"),
    ("Russia Time Zone 11", "Asia/Kamchatka"),
    ("Russia Time Zone 3", "Europe/Samara"),
    ("Russian Standard Time", "Europe/Moscow"),
    ("SA Eastern Standard Time", "America/Cayenne"),
    ("SA Pacific Standard Time", "America/Bogota"),
    ("SA Western Standard Time", "America/La_Paz"),
    ("SE Asia Standard Time", "Asia/Bangkok"),
    ("Samoa Standard Time", "Pacific/Apia"),
    ("Singapore Standard Time", "Asia/Singapore"),
    ("South Africa Standard Time", "Africa/Johannesburg"),
    ("Sri Lanka Standard Time", "Asia/Colombo"),
    ("Syria Standard Time", "Asia/Damascus"),
    ("Taipei Standard Time", "Asia/Taipei"),
    ("Tasmania Standard Time", "Australia/Hobart"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("Tonga Standard Time", "Pacific/Tongatapu"),
    ("Turkey Standard Time", "Europe/Istanbul"),
    ("US Eastern Standard Time", "America/Indianapolis"),
    ("US Mountain Standard Time", "America/Phoenix"),
    ("UTC", "UTC"),
    ("UTC+12", "Etc/GMT-12"),
    ("UTC-02", "Etc/GMT+2"),
    ("UTC-11", "Etc/GMT+11"),
    ("Ulaanbaatar Standard Time", "Asia/Ulaanbaatar"),
    ("Venezuela Standard Time", "America/Caracas"),
    ("Vladivostok Standard Time", "Asia/Vladivostok"),
    ("W. Australia Standard Time", "Australia/Perth"),
    ("W. Central Africa Standard Time", "Africa/Lagos"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("West Asia Standard Time", "Asia/Tashkent"),
    ("West Pacific Standard Time", "Pacific/Port_Moresby"),
    ("Yakutsk Standard Time", "Asia/Yakutsk"),
];

/// Deprecated IANA aliases still common in the wild.
const IANA_ALIASES: &[(&str, &str)] = &[
    ("Asia/Calcutta", "Asia/Kolkata"),
    ("Asia/Katmandu", "Asia/Kathmandu"),
    ("Asia/Rangoon", "Asia/Yangon"),
    ("Asia/Saigon", "Asia/Ho_Chi_Minh"),
    ("America/Buenos_Aires", "America/Argentina/Buenos_Aires"),
    ("America/Godthab", "America/Nuuk"),
    ("America/Indianapolis", "America/Indiana/Indianapolis"),
    ("Australia/ACT", "Australia/Sydney"),
    ("Australia/NSW", "Australia/Sydney"),
    ("Europe/Kiev", "Europe/Kyiv"),
    ("GB", "Europe/London"),
    ("GB-Eire", "Europe/London"),
    ("US/Alaska", "America/Anchorage"),
    ("US/Arizona", "America/Phoenix"),
    ("US/Central", "America/Chicago"),
    ("US/Eastern", "America/New_York"),
    ("US/Hawaii", "Pacific/Honolulu"),
    ("US/Mountain", "America/Denver"),
    ("US/Pacific", "America/Los_Angeles"),
    ("Japan", "Asia/Tokyo"),
    ("Singapore", "Asia/Singapore"),
    ("Hongkong", "Asia/Hong_Kong"),
    ("Eire", "Europe/Dublin"),
    ("Zulu", "UTC"),
    ("GMT", "UTC"),
    ("Z", "UTC"),
];

// ---------------------------------------------------------------------------
// TimezoneResolver
// ---------------------------------------------------------------------------

/// Resolves feed-supplied zone labels to `chrono_tz::Tz`, falling back to
/// the operator's default zone.
#[derive(Debug, Clone)]
pub struct TimezoneResolver {
    default_zone: Tz,
}

impl TimezoneResolver {
    pub fn new(default_zone: Tz) -> Self {
        TimezoneResolver { default_zone }
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    /// Resolve a zone label.  Never fails; unknown labels land on the
    /// default zone (logged at debug, once per offending event in practice
    /// since callers resolve per property).
    pub fn resolve(&self, label: &str) -> Tz {
        self.try_resolve(label).unwrap_or_else(|| {
            debug!(label, fallback = %self.default_zone, "unresolvable timezone label");
            self.default_zone
        })
    }

    /// Resolve without the default-zone fallback.
    pub fn try_resolve(&self, label: &str) -> Option<Tz> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(iana) = lookup_windows_zone(trimmed) {
            return Tz::from_str(iana).ok();
        }
        if let Some(modern) = lookup_iana_alias(trimmed) {
            return Tz::from_str(modern).ok();
        }
        Tz::from_str(trimmed).ok()
    }

    /// Interpret a wall-clock value under `tz`, auto-correcting a stale
    /// supplied offset.
    ///
    /// When the feed carried an explicit UTC offset alongside the wall
    /// clock and that offset disagrees with the zone's DST-correct offset
    /// for the instant, the zone wins: the wall clock is re-interpreted
    /// under the zone's rules.  Ambiguous local times (fall-back hour)
    /// prefer the supplied offset when it matches either candidate,
    /// otherwise the earlier one.
    pub fn resolve_local(
        &self,
        wall: NaiveDateTime,
        supplied_offset_secs: Option<i32>,
        tz: Tz,
    ) -> DateTime<Utc> {
        match tz.from_local_datetime(&wall) {
            chrono::LocalResult::Single(dt) => {
                if let Some(supplied) = supplied_offset_secs {
                    let actual = dt.offset().fix().local_minus_utc();
                    if supplied != actual {
                        debug!(
                            supplied,
                            actual,
                            zone = %tz,
                            "stale UTC offset corrected against zone rules"
                        );
                    }
                }
                dt.with_timezone(&Utc)
            }
            chrono::LocalResult::Ambiguous(earlier, later) => {
                let chosen = match supplied_offset_secs {
                    Some(supplied) if later.offset().fix().local_minus_utc() == supplied => later,
                    _ => earlier,
                };
                chosen.with_timezone(&Utc)
            }
            // Spring-forward gap: the wall clock never existed; shift
            // forward by an hour the way most producers do.
            chrono::LocalResult::None => {
                let shifted = wall + chrono::Duration::hours(1);
                match tz.from_local_datetime(&shifted) {
                    chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
                    chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                    chrono::LocalResult::None => Utc.from_utc_datetime(&wall),
                }
            }
        }
    }
}

fn lookup_windows_zone(label: &str) -> Option<&'static str> {
    WINDOWS_ZONES
        .iter()
        .find(|(win, _)| win.eq_ignore_ascii_case(label))
        .map(|(_, iana)| *iana)
}

fn lookup_iana_alias(label: &str) -> Option<&'static str> {
    IANA_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(label))
        .map(|(_, modern)| *modern)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
