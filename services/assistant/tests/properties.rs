//! Property suite for the data-plane invariants.
//!
//! These check shapes of behavior rather than single examples: dedup
//! idempotence, filter monotonicity, status-rule priority stability, the
//! speech-markup length cap, and cache-key stability.

use cal_core::{PrioritizerRules, dedup_events, filter_upcoming, pick_next};
use chime_protocol::EventStatus;
use chime_test_utils::event_with_duration;
use chrono::{DateTime, TimeZone, Utc};
use ics_core::status::{StatusInput, map_status};
use ics_core::StatusRules;
use proptest::prelude::*;
use speech_core::{SsmlRenderer, Urgency, spoken_countdown};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 5, 0, 0, 0).unwrap()
}

/// A small arbitrary event: (uid choice, subject choice, start offset
/// minutes, duration minutes, cancelled).
fn arb_event() -> impl Strategy<Value = chime_protocol::CalendarEvent> {
    (0..6u8, 0..3u8, -600i64..600, 1i64..180, any::<bool>()).prop_map(
        |(uid, subject, offset, duration, cancelled)| {
            let mut event = event_with_duration(
                &format!("uid-{}", uid),
                ["Standup", "Review", "Lunch"][subject as usize],
                base() + chrono::Duration::minutes(offset),
                chrono::Duration::minutes(duration),
            );
            event.is_cancelled = cancelled;
            event
        },
    )
}

proptest! {
    #[test]
    fn dedup_is_idempotent(events in proptest::collection::vec(arb_event(), 0..40)) {
        let once = dedup_events(events);
        let twice = dedup_events(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn dedup_never_grows(events in proptest::collection::vec(arb_event(), 0..40)) {
        let len = events.len();
        prop_assert!(dedup_events(events).len() <= len);
    }

    #[test]
    fn no_past_event_survives_the_filter(
        events in proptest::collection::vec(arb_event(), 0..40),
        now_offset in -300i64..300,
    ) {
        let now = base() + chrono::Duration::minutes(now_offset);
        let filtered = filter_upcoming(events.clone(), now, |_| false);
        prop_assert!(filtered.len() <= events.len());
        for event in &filtered {
            prop_assert!(event.end.utc > now);
            prop_assert!(!event.is_cancelled);
        }
    }

    #[test]
    fn picked_next_is_always_a_surviving_candidate(
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let now = base();
        let rules = PrioritizerRules::default();
        if let Some(next) = pick_next(&events, now, &rules) {
            prop_assert!(next.event.end.utc > now);
            prop_assert!(next.event.status.is_blocking());
            prop_assert_eq!(
                next.seconds_until_start,
                (next.event.start.utc - now).num_seconds()
            );
        }
    }

    #[test]
    fn vendor_deleted_dominates_any_lower_priority_mix(
        status in proptest::option::of("(?i)(confirmed|tentative|cancelled)"),
        transparency in proptest::option::of("(?i)(opaque|transparent)"),
        busy in proptest::option::of("(?i)(busy|free|oof|tentative)"),
        subject in "[A-Za-z: ]{0,30}",
    ) {
        let input = StatusInput {
            vendor_deleted: true,
            vendor_busy_status: busy,
            status,
            transparency,
            subject,
        };
        prop_assert_eq!(map_status(&input, &StatusRules::default()), EventStatus::Free);
    }

    #[test]
    fn adding_lower_priority_markers_never_changes_a_free_vendor_verdict(
        status in proptest::option::of("(?i)(confirmed|tentative)"),
        transparency in proptest::option::of("(?i)(opaque|transparent)"),
    ) {
        let bare = StatusInput {
            vendor_busy_status: Some("FREE".to_owned()),
            subject: "Design review".to_owned(),
            ..StatusInput::default()
        };
        let with_markers = StatusInput {
            status,
            transparency,
            ..bare.clone()
        };
        prop_assert_eq!(
            map_status(&bare, &StatusRules::default()),
            map_status(&with_markers, &StatusRules::default())
        );
    }

    #[test]
    fn rendered_markup_respects_the_length_cap(text in ".{0,600}") {
        let renderer = SsmlRenderer::default();
        for urgency in [Urgency::Immediate, Urgency::Soon, Urgency::Normal] {
            if let Some(ssml) = renderer.render(&text, urgency) {
                prop_assert!(ssml.chars().count() <= 500);
                prop_assert!(ssml.starts_with("<speak>"));
                prop_assert!(ssml.ends_with("</speak>"));
            }
        }
    }

    #[test]
    fn countdown_speech_is_never_empty(seconds in -86_400i64..86_400) {
        prop_assert!(!spoken_countdown(seconds).is_empty());
    }

    #[test]
    fn cache_key_ignores_param_order(
        params in proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9/]{1,12}"), 0..5),
        version in 0u64..100,
    ) {
        use assistant::response_cache::ResponseCache;
        let forward: Vec<(String, String)> = params.clone();
        let mut reversed = params;
        reversed.reverse();
        prop_assert_eq!(
            ResponseCache::key("next-meeting", version, &forward),
            ResponseCache::key("next-meeting", version, &reversed)
        );
    }
}

// ---------------------------------------------------------------------------
// Randomized publish/read interleaving (window atomicity)
// ---------------------------------------------------------------------------

#[test]
fn window_reads_interleaved_with_publishes_are_never_torn() {
    use assistant::window::{CycleStats, WindowPublisher};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    let publisher = Arc::new(WindowPublisher::new(base()));
    let stop = Arc::new(AtomicBool::new(false));
    let stats = CycleStats {
        sources_total: 1,
        sources_failed: 0,
    };

    let writer = {
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            for round in 1..300usize {
                // Every event in window v carries subject "round-v".
                let events = (0..round % 7)
                    .map(|i| {
                        event_with_duration(
                            &format!("e{}", i),
                            &format!("round-{}", round),
                            base(),
                            chrono::Duration::minutes(30),
                        )
                    })
                    .collect();
                publisher.install(events, &stats, base());
            }
            stop.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let publisher = Arc::clone(&publisher);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let window = publisher.read();
                    let mut subjects: Vec<_> =
                        window.events.iter().map(|e| e.subject.as_str()).collect();
                    subjects.dedup();
                    assert!(
                        subjects.len() <= 1,
                        "window mixed events from different publishes: {:?}",
                        subjects
                    );
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}
