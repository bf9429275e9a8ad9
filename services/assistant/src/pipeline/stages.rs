//! The built-in pipeline stages and topology constructors.

use async_trait::async_trait;
use cal_core::{ExpandConfig, TimezoneResolver, apply_overrides, dedup_events, expand_master,
    filter_upcoming};
use chime_protocol::CalendarEvent;
use ics_core::{ParserConfig, ParserLimits, StatusRules, StreamingParser, datetime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::Config;
use crate::pipeline::{Pipeline, ProcessingContext, Stage, StageResult};
use crate::skipped::SkippedStore;

/// Chunk size fed to the streaming parser.
const PARSE_CHUNK_BYTES: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Topology constructors
// ---------------------------------------------------------------------------

/// parse → expand → merge → dedupe → sort
pub fn per_source_pipeline(
    config: &Config,
    resolver: TimezoneResolver,
    expansion_workers: Arc<Semaphore>,
) -> Pipeline {
    Pipeline::new(
        "per-source",
        vec![
            Box::new(ParseStage {
                limits: ParserLimits::default(),
                resolver: resolver.clone(),
                status_rules: StatusRules::default(),
            }),
            Box::new(ExpandStage {
                resolver,
                workers: expansion_workers,
                occurrence_cap: config.max_occurrences_per_rule,
                time_budget: config.expansion_time_budget,
                yield_every: config.expansion_yield_frequency,
                tolerance: config.exdate_tolerance,
            }),
            Box::new(MergeStage {
                tolerance: config.exdate_tolerance,
            }),
            Box::new(DedupStage),
            Box::new(SortStage),
        ],
    )
}

/// drop skipped → time window → size limit
pub fn post_processing_pipeline(skipped: Arc<dyn SkippedStore>) -> Pipeline {
    Pipeline::new(
        "post-processing",
        vec![
            Box::new(SkippedFilterStage { store: skipped }),
            Box::new(TimeWindowStage),
            Box::new(LimitStage),
        ],
    )
}

// ---------------------------------------------------------------------------
// ParseStage
// ---------------------------------------------------------------------------

/// Runs the streaming ICS parser over `ctx.raw_content`.
pub struct ParseStage {
    pub limits: ParserLimits,
    pub resolver: TimezoneResolver,
    pub status_rules: StatusRules,
}

#[async_trait]
impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let Some(raw) = ctx.raw_content.take() else {
            return StageResult::fail(0, "no raw content to parse");
        };

        let mut parser = StreamingParser::new(ParserConfig {
            limits: self.limits.clone(),
            resolver: self.resolver.clone(),
            status_rules: self.status_rules.clone(),
            user_email: ctx.user_email.clone(),
        });

        for chunk in raw.chunks(PARSE_CHUNK_BYTES) {
            if let Err(e) = parser.push_chunk(chunk) {
                return StageResult::fail(0, format!("ICS stream aborted: {}", e));
            }
        }
        match parser.finish() {
            Ok(outcome) => {
                ctx.metadata = Some(outcome.metadata);
                let mut result = StageResult::ok(0, outcome.events);
                result.events_in = 0;
                result.events_filtered = 0;
                result.warnings = outcome.warnings;
                if outcome.events_truncated {
                    result
                        .warnings
                        .push("event cap reached, feed truncated".to_owned());
                }
                result
            }
            Err(e) => StageResult::fail(0, format!("ICS stream aborted: {}", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// ExpandStage
// ---------------------------------------------------------------------------

/// Expands RRULE masters into instances under the worker semaphore.
///
/// Successfully expanded masters are replaced by their instances; masters
/// whose rule failed to parse are kept, flagged, for diagnostics.
pub struct ExpandStage {
    pub resolver: TimezoneResolver,
    pub workers: Arc<Semaphore>,
    pub occurrence_cap: usize,
    pub time_budget: Duration,
    pub yield_every: usize,
    pub tolerance: chrono::Duration,
}

#[async_trait]
impl Stage for ExpandStage {
    fn name(&self) -> &'static str {
        "expand"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let events = std::mem::take(&mut ctx.events);
        let events_in = events.len();

        let (masters, mut out): (Vec<_>, Vec<_>) = events.into_iter().partition(|e| {
            e.rrule_raw.is_some() && !e.is_expanded_instance && e.recurrence_id.is_none()
        });

        let cfg = ExpandConfig {
            now: ctx.now,
            window_end: ctx.window_end,
            occurrence_cap: self.occurrence_cap,
            time_budget: self.time_budget,
            yield_every: self.yield_every,
            suppress_tolerance: self.tolerance,
            max_scan_iterations: 50_000,
        };

        let mut warnings = Vec::new();
        for mut master in masters {
            // EXDATEs plus the original instants of this UID's overrides:
            // the expander must not emit the unmodified occurrence at a
            // moved instance's slot.
            let mut suppress: Vec<_> = master
                .exdates_raw
                .iter()
                .flat_map(|line| datetime::parse_exdate_line(line, &self.resolver))
                .collect();
            suppress.extend(
                out.iter()
                    .filter(|e| e.uid == master.uid)
                    .filter_map(|e| e.recurrence_id),
            );

            let _permit = self
                .workers
                .acquire()
                .await
                .expect("expansion semaphore never closes");
            match expand_master(&master, &suppress, &cfg).await {
                Ok(expansion) => {
                    warnings.extend(expansion.warnings);
                    out.extend(expansion.instances);
                }
                Err(e) => {
                    warnings.push(format!("recurrence not expanded: {}", e));
                    master.expansion_failed = true;
                    out.push(master);
                }
            }
        }

        let mut result = StageResult::ok(events_in, out);
        result.events_filtered = 0;
        result.warnings = warnings;
        result
    }
}

// ---------------------------------------------------------------------------
// Merge / dedup / sort
// ---------------------------------------------------------------------------

/// Applies RECURRENCE-ID overrides against expanded instances.
pub struct MergeStage {
    pub tolerance: chrono::Duration,
}

#[async_trait]
impl Stage for MergeStage {
    fn name(&self) -> &'static str {
        "merge"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        let (expanded, originals): (Vec<_>, Vec<_>) =
            events.into_iter().partition(|e| e.is_expanded_instance);
        StageResult::ok(events_in, apply_overrides(originals, expanded, self.tolerance))
    }
}

pub struct DedupStage;

#[async_trait]
impl Stage for DedupStage {
    fn name(&self) -> &'static str {
        "dedupe"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        StageResult::ok(events_in, dedup_events(events))
    }
}

pub struct SortStage;

#[async_trait]
impl Stage for SortStage {
    fn name(&self) -> &'static str {
        "sort"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let mut events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        events.sort_by(|a, b| {
            a.start
                .utc
                .cmp(&b.start.utc)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        StageResult::ok(events_in, events)
    }
}

// ---------------------------------------------------------------------------
// Post-processing stages
// ---------------------------------------------------------------------------

pub struct SkippedFilterStage {
    pub store: Arc<dyn SkippedStore>,
}

#[async_trait]
impl Stage for SkippedFilterStage {
    fn name(&self) -> &'static str {
        "drop-skipped"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        let kept: Vec<CalendarEvent> = events
            .into_iter()
            .filter(|e| !self.store.is_skipped(&e.id))
            .collect();
        if kept.len() != events_in {
            debug!(dropped = events_in - kept.len(), "skipped events removed");
        }
        StageResult::ok(events_in, kept)
    }
}

/// Keeps future (or in-progress), non-cancelled events inside the window.
pub struct TimeWindowStage;

#[async_trait]
impl Stage for TimeWindowStage {
    fn name(&self) -> &'static str {
        "time-window"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        let window_end = ctx.window_end;
        let kept: Vec<CalendarEvent> = filter_upcoming(events, ctx.now, |_| false)
            .into_iter()
            .filter(|e| e.start.utc <= window_end)
            .collect();
        StageResult::ok(events_in, kept)
    }
}

pub struct LimitStage;

#[async_trait]
impl Stage for LimitStage {
    fn name(&self) -> &'static str {
        "limit"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult {
        let mut events = std::mem::take(&mut ctx.events);
        let events_in = events.len();
        events.truncate(ctx.window_size_limit);
        StageResult::ok(events_in, events)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_vars;
    use crate::skipped::InMemorySkippedStore;
    use chime_test_utils::{IcsBuilder, event_at};
    use chrono::TimeZone;
    use chrono::Utc;
    use std::collections::HashMap;

    fn config() -> Config {
        let mut vars = HashMap::new();
        vars.insert("ICS_URL".to_owned(), "https://unused/cal.ics".to_owned());
        load_config_from_vars(&vars).unwrap()
    }

    fn resolver() -> TimezoneResolver {
        TimezoneResolver::new(chrono_tz::UTC)
    }

    fn ctx_at(now: chrono::DateTime<Utc>) -> ProcessingContext {
        ProcessingContext::new(now, 365, 50)
    }

    fn run_per_source(
        feed: String,
        now: chrono::DateTime<Utc>,
    ) -> (ProcessingContext, crate::pipeline::PipelineOutcome) {
        let config = config();
        let pipeline =
            per_source_pipeline(&config, resolver(), Arc::new(Semaphore::new(1)));
        let mut ctx = ctx_at(now);
        ctx.raw_content = Some(feed.into_bytes());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = rt.block_on(pipeline.run(&mut ctx));
        (ctx, outcome)
    }

    #[test]
    fn per_source_expands_weekly_master() {
        let feed = IcsBuilder::new()
            .event(&[
                "UID:M",
                "SUMMARY:Weekly sync",
                "DTSTART:20251103T090000Z",
                "DTEND:20251103T100000Z",
                "RRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=4",
            ])
            .build();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let (ctx, outcome) = run_per_source(feed, now);

        assert!(outcome.success);
        assert_eq!(ctx.events.len(), 4);
        assert!(ctx.events.iter().all(|e| e.is_expanded_instance));
        let starts: Vec<_> = ctx.events.iter().map(|e| e.start.utc).collect();
        assert_eq!(
            starts,
            vec![
                Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 11, 17, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn per_source_honors_exdate() {
        let feed = IcsBuilder::new()
            .event(&[
                "UID:M",
                "SUMMARY:Weekly sync",
                "DTSTART:20251103T090000Z",
                "DTEND:20251103T100000Z",
                "RRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=4",
                "EXDATE:20251124T090000Z",
            ])
            .build();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let (ctx, _) = run_per_source(feed, now);

        assert_eq!(ctx.events.len(), 3);
        assert!(
            !ctx.events
                .iter()
                .any(|e| e.start.utc == Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn per_source_override_replaces_occurrence() {
        let feed = IcsBuilder::new()
            .event(&[
                "UID:M",
                "SUMMARY:Weekly sync",
                "DTSTART:20251103T090000Z",
                "DTEND:20251103T100000Z",
                "RRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=4",
            ])
            .event(&[
                "UID:M",
                "SUMMARY:Weekly sync (moved)",
                "DTSTART:20251110T113000Z",
                "DTEND:20251110T123000Z",
                "RECURRENCE-ID:20251110T090000Z",
            ])
            .build();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let (ctx, _) = run_per_source(feed, now);

        assert_eq!(ctx.events.len(), 4);
        let at_0900 = Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap();
        let at_1130 = Utc.with_ymd_and_hms(2025, 11, 10, 11, 30, 0).unwrap();
        assert!(!ctx.events.iter().any(|e| e.start.utc == at_0900));
        assert!(ctx.events.iter().any(|e| e.start.utc == at_1130));
    }

    #[test]
    fn per_source_flags_unexpandable_master() {
        let feed = IcsBuilder::new()
            .event(&[
                "UID:BAD",
                "SUMMARY:Broken series",
                "DTSTART:20251103T090000Z",
                "RRULE:FREQ=BOGUS",
            ])
            .build();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let (ctx, outcome) = run_per_source(feed, now);

        assert!(outcome.success, "a bad rule is a warning, not a failure");
        assert_eq!(ctx.events.len(), 1);
        assert!(ctx.events[0].expansion_failed);
        assert!(outcome.warnings.iter().any(|w| w.contains("not expanded")));
    }

    #[test]
    fn per_source_fails_on_corrupt_stream() {
        let mut feed = String::from("BEGIN:VCALENDAR\r\n");
        for _ in 0..10 {
            feed.push_str("BEGIN:VEVENT\r\nUID:same\r\nDTSTART:20251103T090000Z\r\nEND:VEVENT\r\n");
        }
        feed.push_str("END:VCALENDAR\r\n");
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let (_, outcome) = run_per_source(feed, now);
        assert!(!outcome.success);
        assert_eq!(outcome.failed_stage, Some("parse"));
    }

    #[tokio::test]
    async fn post_processing_drops_skipped_past_and_limits() {
        let now = Utc.with_ymd_and_hms(2025, 11, 5, 12, 0, 0).unwrap();
        let store = Arc::new(InMemorySkippedStore::new());
        store.skip("skipped-one");

        let mut events = vec![
            event_at("past", "Old", now - chrono::Duration::hours(3)),
            event_at("skipped-one", "Skipped", now + chrono::Duration::hours(1)),
        ];
        for i in 0..60 {
            events.push(event_at(
                &format!("future-{}", i),
                "Future",
                now + chrono::Duration::hours(2 + i),
            ));
        }

        let pipeline = post_processing_pipeline(store);
        let mut ctx = ctx_at(now);
        ctx.window_size_limit = 50;
        ctx.events = events;
        let outcome = pipeline.run(&mut ctx).await;

        assert!(outcome.success);
        assert_eq!(ctx.events.len(), 50);
        assert!(!ctx.events.iter().any(|e| e.id == "past"));
        assert!(!ctx.events.iter().any(|e| e.id == "skipped-one"));
    }

    #[tokio::test]
    async fn time_window_keeps_in_progress_events() {
        let now = Utc.with_ymd_and_hms(2025, 11, 5, 12, 30, 0).unwrap();
        let pipeline = post_processing_pipeline(Arc::new(InMemorySkippedStore::new()));
        let mut ctx = ctx_at(now);
        ctx.events = vec![event_at("run", "Running", now - chrono::Duration::minutes(30))];
        pipeline.run(&mut ctx).await;
        assert_eq!(ctx.events.len(), 1);
    }
}
