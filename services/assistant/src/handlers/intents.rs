//! Pure intent computation.
//!
//! Every voice intent is a function `(window, now, params) → response` with
//! no I/O and no shared mutable state, so the same code serves live
//! requests, the parameterized cache, and refresh-time precomputation.
//! Speech wording lives here; SSML is rendered best-effort and dropped on
//! any validation failure.

use cal_core::{NextMeetingCategory, PrioritizerRules, pick_next};
use chime_protocol::{
    CalendarEvent, DensityBucket, DoneForDayResponse, EventWindow, FreeBlock,
    LaunchSummaryResponse, MeetingInsight, MeetingJson, MorningSummaryResponse,
    NextMeetingResponse, TimeUntilNextResponse,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use speech_core::{SsmlRenderer, Urgency, spoken_clock_time, spoken_countdown};

/// Morning-summary timeframe, local hours.
const MORNING_START_HOUR: u32 = 6;
const MORNING_END_HOUR: u32 = 12;
/// Meetings closer than this are back-to-back.
const BACK_TO_BACK_GAP: chrono::Duration = chrono::Duration::minutes(5);
/// Minimum gap reported as a free block.
const FREE_BLOCK_MIN: chrono::Duration = chrono::Duration::minutes(15);
/// Wake-up suggestion lead time before the first meeting.
const WAKE_UP_LEAD: chrono::Duration = chrono::Duration::minutes(90);

/// Detail level of the morning summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Brief,
    Standard,
    Detailed,
}

impl DetailLevel {
    pub fn parse(raw: &str) -> Option<DetailLevel> {
        match raw.to_ascii_lowercase().as_str() {
            "brief" => Some(DetailLevel::Brief),
            "standard" => Some(DetailLevel::Standard),
            "detailed" => Some(DetailLevel::Detailed),
            _ => None,
        }
    }
}

/// Shared, immutable dependencies of the intent functions.
#[derive(Debug, Clone)]
pub struct IntentDeps {
    pub rules: PrioritizerRules,
    pub renderer: SsmlRenderer,
}

impl Default for IntentDeps {
    fn default() -> Self {
        IntentDeps {
            rules: PrioritizerRules::default(),
            renderer: SsmlRenderer::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Next meeting / time until next
// ---------------------------------------------------------------------------

pub fn next_meeting(
    window: &EventWindow,
    now: DateTime<Utc>,
    tz: Tz,
    deps: &IntentDeps,
) -> NextMeetingResponse {
    let Some(next) = pick_next(&window.events, now, &deps.rules) else {
        let speech_text = "You have no upcoming meetings.".to_owned();
        let ssml = deps.renderer.render(&speech_text, Urgency::Normal);
        return NextMeetingResponse {
            speech_text,
            ssml,
            meeting: None,
            seconds_until_start: None,
            duration_spoken: String::new(),
        };
    };

    let countdown = spoken_countdown(next.seconds_until_start);
    let clock = spoken_clock_time(next.event.start.utc, tz);
    let speech_text = match next.category {
        NextMeetingCategory::Active => format!(
            "Your meeting {} started {}.",
            next.event.subject, countdown
        ),
        NextMeetingCategory::Upcoming => format!(
            "Your next meeting is {} {} at {}.",
            next.event.subject, countdown, clock
        ),
    };
    let urgency = Urgency::from_seconds_until(next.seconds_until_start);
    let ssml = deps.renderer.render(&speech_text, urgency);

    NextMeetingResponse {
        speech_text,
        ssml,
        meeting: Some(MeetingJson::from(&next.event)),
        seconds_until_start: Some(next.seconds_until_start),
        duration_spoken: countdown,
    }
}

pub fn time_until_next(
    window: &EventWindow,
    now: DateTime<Utc>,
    deps: &IntentDeps,
) -> TimeUntilNextResponse {
    let Some(next) = pick_next(&window.events, now, &deps.rules) else {
        let speech_text = "You have nothing coming up.".to_owned();
        let ssml = deps.renderer.render(&speech_text, Urgency::Normal);
        return TimeUntilNextResponse {
            speech_text,
            ssml,
            seconds_until_start: None,
            duration_spoken: String::new(),
        };
    };

    let countdown = spoken_countdown(next.seconds_until_start);
    let speech_text = match next.category {
        NextMeetingCategory::Active => {
            format!("Your current meeting started {}.", countdown)
        }
        NextMeetingCategory::Upcoming => format!("Your next meeting starts {}.", countdown),
    };
    let urgency = Urgency::from_seconds_until(next.seconds_until_start);
    let ssml = deps.renderer.render(&speech_text, urgency);

    TimeUntilNextResponse {
        speech_text,
        ssml,
        seconds_until_start: Some(next.seconds_until_start),
        duration_spoken: countdown,
    }
}

// ---------------------------------------------------------------------------
// Done for day / launch summary
// ---------------------------------------------------------------------------

/// Today's remaining blocking meetings in the caller's zone.
fn remaining_today<'a>(
    window: &'a EventWindow,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<&'a CalendarEvent> {
    let today = now.with_timezone(&tz).date_naive();
    window
        .events
        .iter()
        .filter(|e| {
            !e.is_all_day
                && !e.is_cancelled
                && !e.expansion_failed
                && e.status.is_blocking()
                && e.end.utc > now
                && e.start.utc.with_timezone(&tz).date_naive() == today
        })
        .collect()
}

pub fn done_for_day(
    window: &EventWindow,
    now: DateTime<Utc>,
    tz: Tz,
    deps: &IntentDeps,
) -> DoneForDayResponse {
    let last_end = remaining_today(window, now, tz)
        .iter()
        .map(|e| e.end.utc)
        .max();

    let speech_text = match last_end {
        Some(end) => format!(
            "You're done for the day at {}.",
            spoken_clock_time(end, tz)
        ),
        None => "You're all done for today.".to_owned(),
    };
    let ssml = deps.renderer.render(&speech_text, Urgency::Normal);

    DoneForDayResponse {
        speech_text,
        ssml,
        last_meeting_end: last_end,
        timezone: tz.name().to_owned(),
    }
}

pub fn launch_summary(
    window: &EventWindow,
    now: DateTime<Utc>,
    tz: Tz,
    deps: &IntentDeps,
) -> LaunchSummaryResponse {
    let remaining = remaining_today(window, now, tz).len() as u32;
    let next = pick_next(&window.events, now, &deps.rules);

    let speech_text = match (&next, remaining) {
        (None, _) | (_, 0) => "You have no more meetings today.".to_owned(),
        (Some(next), n) => {
            let meetings = if n == 1 {
                "1 more meeting".to_owned()
            } else {
                format!("{} more meetings", n)
            };
            format!(
                "You have {} today. Next is {} {}.",
                meetings,
                next.event.subject,
                spoken_countdown(next.seconds_until_start)
            )
        }
    };
    let ssml = deps.renderer.render(&speech_text, Urgency::Normal);

    LaunchSummaryResponse {
        speech_text,
        ssml,
        meetings_remaining_today: remaining,
        next_meeting: next.map(|n| MeetingJson::from(&n.event)),
    }
}

// ---------------------------------------------------------------------------
// Morning summary
// ---------------------------------------------------------------------------

pub struct MorningSummaryParams {
    pub date: NaiveDate,
    pub tz: Tz,
    pub detail_level: DetailLevel,
    pub max_events: usize,
}

pub fn morning_summary(
    window: &EventWindow,
    params: &MorningSummaryParams,
    deps: &IntentDeps,
) -> MorningSummaryResponse {
    let tz = params.tz;
    let tf_start = local_instant(params.date, MORNING_START_HOUR, tz);
    let tf_end = local_instant(params.date, MORNING_END_HOUR, tz);

    let mut meetings: Vec<&CalendarEvent> = window
        .events
        .iter()
        .filter(|e| {
            !e.is_all_day
                && !e.is_cancelled
                && !e.expansion_failed
                && e.status.is_blocking()
                && e.start.utc >= tf_start
                && e.start.utc < tf_end
        })
        .collect();
    meetings.sort_by_key(|e| e.start.utc);

    let mut back_to_back_count = 0u32;
    let mut insights = Vec::new();
    let mut free_blocks = Vec::new();
    let mut prev_end: Option<DateTime<Utc>> = Some(tf_start);

    for event in &meetings {
        let back_to_back = match prev_end {
            Some(prev) if prev > tf_start => event.start.utc - prev <= BACK_TO_BACK_GAP,
            _ => false,
        };
        if back_to_back {
            back_to_back_count += 1;
        }
        if let Some(prev) = prev_end {
            let gap = event.start.utc - prev;
            if gap >= FREE_BLOCK_MIN {
                free_blocks.push(FreeBlock {
                    start: prev,
                    end: event.start.utc,
                    minutes: gap.num_minutes(),
                });
            }
        }
        if insights.len() < params.max_events {
            insights.push(MeetingInsight {
                subject: event.subject.clone(),
                start: event.start.utc,
                duration_minutes: event.duration().num_minutes(),
                is_online_meeting: event.is_online_meeting,
                back_to_back,
            });
        }
        prev_end = Some(event.end.utc.max(prev_end.unwrap_or(event.end.utc)));
    }
    if let Some(prev) = prev_end {
        if prev < tf_end && tf_end - prev >= FREE_BLOCK_MIN {
            free_blocks.push(FreeBlock {
                start: prev,
                end: tf_end,
                minutes: (tf_end - prev).num_minutes(),
            });
        }
    }

    let total = meetings.len() as u32;
    let density = classify_density(total, back_to_back_count);
    let suggested_wake_up = meetings.first().map(|first| {
        let floor = local_instant(params.date, 5, tz);
        (first.start.utc - WAKE_UP_LEAD).max(floor)
    });

    let speech_text = morning_speech(
        total,
        density,
        back_to_back_count,
        &free_blocks,
        meetings.first(),
        tz,
        params.detail_level,
    );
    let ssml = deps.renderer.render(&speech_text, Urgency::Normal);

    MorningSummaryResponse {
        speech_text,
        ssml,
        timeframe_start: tf_start,
        timeframe_end: tf_end,
        total_meetings: total,
        density,
        back_to_back_count,
        insights,
        free_blocks,
        suggested_wake_up,
    }
}

fn classify_density(total: u32, back_to_back: u32) -> DensityBucket {
    if total == 0 {
        return DensityBucket::Clear;
    }
    if total >= 3 && back_to_back >= total - 1 {
        return DensityBucket::BackToBack;
    }
    match total {
        1..=2 => DensityBucket::Light,
        3..=4 => DensityBucket::Moderate,
        _ => DensityBucket::Busy,
    }
}

fn density_phrase(density: DensityBucket) -> &'static str {
    match density {
        DensityBucket::Clear => "a clear morning",
        DensityBucket::Light => "a light morning",
        DensityBucket::Moderate => "a moderate morning",
        DensityBucket::Busy => "a busy morning",
        DensityBucket::BackToBack => "a back-to-back morning",
    }
}

fn morning_speech(
    total: u32,
    density: DensityBucket,
    back_to_back: u32,
    free_blocks: &[FreeBlock],
    first: Option<&&CalendarEvent>,
    tz: Tz,
    detail: DetailLevel,
) -> String {
    if total == 0 {
        return "Your morning is clear.".to_owned();
    }
    let meetings = if total == 1 {
        "1 meeting".to_owned()
    } else {
        format!("{} meetings", total)
    };
    let mut speech = format!("You have {}, {}.", meetings, density_phrase(density));

    if detail != DetailLevel::Brief {
        if let Some(first) = first {
            speech.push_str(&format!(
                " First is {} at {}.",
                first.subject,
                spoken_clock_time(first.start.utc, tz)
            ));
        }
    }
    if detail == DetailLevel::Detailed {
        if back_to_back > 0 {
            speech.push_str(&format!(" {} are back to back.", back_to_back));
        }
        if let Some(longest) = free_blocks.iter().max_by_key(|b| b.minutes) {
            speech.push_str(&format!(
                " Your longest free block is {} minutes.",
                longest.minutes
            ));
        }
    }
    speech
}

fn local_instant(date: NaiveDate, hour: u32, tz: Tz) -> DateTime<Utc> {
    let wall = date.and_hms_opt(hour, 0, 0).expect("valid constant hour");
    match tz.from_local_datetime(&wall) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        chrono::LocalResult::None => Utc.from_utc_datetime(&wall),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
