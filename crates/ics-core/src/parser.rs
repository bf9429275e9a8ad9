//! Streaming VCALENDAR parser.
//!
//! # State machine
//! ```text
//! Idle --BEGIN:VCALENDAR--> InCalendar --BEGIN:VEVENT--> InEvent
//!                            ^   |                         |
//!                            |   +----END:VCALENDAR--> Done|
//!                            +------------END:VEVENT-------+
//! ```
//!
//! Callers push byte chunks as they arrive; event records are accumulated
//! and returned by [`StreamingParser::finish`].  Limit overshoots abort
//! with [`IcsError`] and are logged as SECURITY events — an aborted stream
//! fails that source's pipeline run, it never panics and never grows
//! unbounded state.

use cal_core::TimezoneResolver;
use chime_protocol::CalendarEvent;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::limits::ParserLimits;
use crate::lines::LineAssembler;
use crate::property::Property;
use crate::status::StatusRules;
use crate::vevent::{VeventContext, parse_event_block};

// ---------------------------------------------------------------------------
// Config, outcome, errors
// ---------------------------------------------------------------------------

/// Per-stream parser configuration.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub limits: ParserLimits,
    pub resolver: TimezoneResolver,
    pub status_rules: StatusRules,
    /// Calendar owner's address, for `is_organizer` detection.
    pub user_email: Option<String>,
}

impl ParserConfig {
    pub fn new(resolver: TimezoneResolver) -> Self {
        ParserConfig {
            limits: ParserLimits::default(),
            resolver,
            status_rules: StatusRules::default(),
            user_email: None,
        }
    }
}

/// Calendar-level metadata seen outside VEVENT blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarMetadata {
    /// `X-WR-CALNAME`
    pub name: Option<String>,
    /// `PRODID`
    pub prodid: Option<String>,
    /// `X-WR-TIMEZONE`
    pub default_tz: Option<String>,
}

/// Everything a completed stream produced.
#[derive(Debug)]
pub struct ParseOutcome {
    pub events: Vec<CalendarEvent>,
    pub metadata: CalendarMetadata,
    pub warnings: Vec<String>,
    /// True when the event cap was hit and later VEVENTs were dropped.
    pub events_truncated: bool,
    pub bytes_seen: u64,
}

/// Fatal stream conditions.  All of these abort the source for this cycle.
#[derive(Debug, Error)]
pub enum IcsError {
    #[error("input exceeded {limit} bytes")]
    InputTooLarge { limit: u64 },
    #[error("repeated (UID, RECURRENCE-ID) tuple for '{uid}' seen {count} times")]
    UpstreamCorrupted { uid: String, count: u32 },
    #[error("chunk iteration limit ({0}) exceeded")]
    IterationLimit(u32),
    #[error("stream exceeded its wall-clock budget")]
    StreamTimeout,
}

// ---------------------------------------------------------------------------
// StreamingParser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InCalendar,
    InEvent,
    Done,
}

pub struct StreamingParser {
    config: ParserConfig,
    state: State,
    assembler: LineAssembler,
    event_lines: Vec<String>,
    events: Vec<CalendarEvent>,
    warnings: Vec<String>,
    metadata: CalendarMetadata,
    seen_keys: HashMap<(String, String), u32>,
    bytes_seen: u64,
    iterations: u32,
    started: Instant,
    events_truncated: bool,
    warned_size: bool,
}

impl StreamingParser {
    pub fn new(config: ParserConfig) -> Self {
        StreamingParser {
            config,
            state: State::Idle,
            assembler: LineAssembler::new(),
            event_lines: Vec::new(),
            events: Vec::new(),
            warnings: Vec::new(),
            metadata: CalendarMetadata::default(),
            seen_keys: HashMap::new(),
            bytes_seen: 0,
            iterations: 0,
            started: Instant::now(),
            events_truncated: false,
            warned_size: false,
        }
    }

    /// Feed the next chunk of the byte stream.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), IcsError> {
        self.iterations += 1;
        if self.iterations > self.config.limits.max_iterations {
            warn!(
                security = true,
                iterations = self.iterations,
                "ICS stream exceeded iteration limit"
            );
            return Err(IcsError::IterationLimit(self.config.limits.max_iterations));
        }
        if self.started.elapsed() > self.config.limits.time_budget {
            warn!(security = true, "ICS stream exceeded wall-clock budget");
            return Err(IcsError::StreamTimeout);
        }

        self.bytes_seen += chunk.len() as u64;
        if self.bytes_seen > self.config.limits.max_input_bytes {
            warn!(
                security = true,
                bytes = self.bytes_seen,
                "ICS stream exceeded max input size"
            );
            return Err(IcsError::InputTooLarge {
                limit: self.config.limits.max_input_bytes,
            });
        }
        if !self.warned_size && self.bytes_seen > self.config.limits.warn_input_bytes {
            self.warned_size = true;
            warn!(
                security = true,
                bytes = self.bytes_seen,
                "ICS stream is suspiciously large"
            );
            self.warnings
                .push(format!("input exceeded {} bytes", self.config.limits.warn_input_bytes));
        }

        let lines = self.assembler.push(chunk);
        for line in lines {
            self.process_line(line)?;
        }
        Ok(())
    }

    /// End of stream: flush and return everything parsed.
    pub fn finish(mut self) -> Result<ParseOutcome, IcsError> {
        let assembler = std::mem::take(&mut self.assembler);
        for line in assembler.finish() {
            self.process_line(line)?;
        }
        if self.state == State::InEvent {
            self.warnings
                .push("stream ended inside a VEVENT block".to_owned());
        } else if self.state == State::InCalendar {
            self.warnings
                .push("stream ended before END:VCALENDAR".to_owned());
        }

        debug!(
            events = self.events.len(),
            warnings = self.warnings.len(),
            bytes = self.bytes_seen,
            "ICS stream complete"
        );
        Ok(ParseOutcome {
            events: self.events,
            metadata: self.metadata,
            warnings: self.warnings,
            events_truncated: self.events_truncated,
            bytes_seen: self.bytes_seen,
        })
    }

    fn process_line(&mut self, line: String) -> Result<(), IcsError> {
        match self.state {
            State::Idle => {
                if line_is(&line, "BEGIN", "VCALENDAR") {
                    self.state = State::InCalendar;
                }
            }
            State::InCalendar => {
                if line_is(&line, "BEGIN", "VEVENT") {
                    self.state = State::InEvent;
                    self.event_lines.clear();
                } else if line_is(&line, "END", "VCALENDAR") {
                    self.state = State::Done;
                } else {
                    self.capture_metadata(&line);
                }
            }
            State::InEvent => {
                if line_is(&line, "END", "VEVENT") {
                    self.state = State::InCalendar;
                    let lines = std::mem::take(&mut self.event_lines);
                    self.finalize_event(&lines)?;
                } else {
                    self.event_lines.push(line);
                }
            }
            State::Done => {}
        }
        Ok(())
    }

    fn capture_metadata(&mut self, line: &str) {
        let Some(prop) = Property::parse(line) else {
            return;
        };
        match prop.name.as_str() {
            "X-WR-CALNAME" => self.metadata.name = Some(prop.text_value()),
            "PRODID" => self.metadata.prodid = Some(prop.value.trim().to_owned()),
            "X-WR-TIMEZONE" => self.metadata.default_tz = Some(prop.value.trim().to_owned()),
            _ => {}
        }
    }

    fn finalize_event(&mut self, lines: &[String]) -> Result<(), IcsError> {
        // Corruption breaker runs even past the event cap — that is the
        // point of continuing to consume a truncated stream.
        let key = corruption_key(lines);
        let count = self.seen_keys.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count > self.config.limits.corruption_threshold {
            warn!(
                security = true,
                uid = %key.0,
                count = *count,
                "repeated (UID, RECURRENCE-ID) tuple, aborting stream"
            );
            return Err(IcsError::UpstreamCorrupted {
                uid: key.0,
                count: *count,
            });
        }

        if self.events.len() >= self.config.limits.max_events {
            if !self.events_truncated {
                self.events_truncated = true;
                warn!(
                    security = true,
                    cap = self.config.limits.max_events,
                    "event cap reached, dropping further events"
                );
                self.warnings.push(format!(
                    "event cap ({}) reached, later events dropped",
                    self.config.limits.max_events
                ));
            }
            return Ok(());
        }

        let ctx = VeventContext {
            resolver: &self.config.resolver,
            status_rules: &self.config.status_rules,
            user_email: self.config.user_email.as_deref(),
        };
        match parse_event_block(lines, &ctx) {
            Ok(event) => self.events.push(event),
            Err(e) => {
                debug!(error = %e, "skipping unparseable VEVENT");
                self.warnings.push(format!("skipped event: {}", e));
            }
        }
        Ok(())
    }
}

/// `BEGIN:VCALENDAR`-style marker comparison, case-insensitive, tolerating
/// trailing whitespace.
fn line_is(line: &str, name: &str, value: &str) -> bool {
    let Some((n, v)) = line.split_once(':') else {
        return false;
    };
    n.trim().eq_ignore_ascii_case(name) && v.trim().eq_ignore_ascii_case(value)
}

fn corruption_key(lines: &[String]) -> (String, String) {
    let mut uid = String::new();
    let mut recurrence_id = String::new();
    for line in lines {
        if let Some(rest) = strip_prefix_ci(line, "UID") {
            uid = rest.to_owned();
        } else if let Some(rest) = strip_prefix_ci(line, "RECURRENCE-ID") {
            recurrence_id = rest.to_owned();
        }
    }
    (uid, recurrence_id)
}

/// Strip `NAME:` or `NAME;params:` case-insensitively, returning the value.
fn strip_prefix_ci<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() < name.len() {
        return None;
    }
    if !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    match line.as_bytes().get(name.len()) {
        Some(b':') => line.split_once(':').map(|(_, v)| v.trim()),
        Some(b';') => line.split_once(':').map(|(_, v)| v.trim()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chime_protocol::EventStatus;

    fn config() -> ParserConfig {
        ParserConfig::new(TimezoneResolver::new(chrono_tz::UTC))
    }

    fn parse_all(input: &str) -> ParseOutcome {
        let mut parser = StreamingParser::new(config());
        parser.push_chunk(input.as_bytes()).unwrap();
        parser.finish().unwrap()
    }

    const SIMPLE: &str = "BEGIN:VCALENDAR\r\n\
PRODID:-//Test//EN\r\n\
X-WR-CALNAME:Work\r\n\
BEGIN:VEVENT\r\n\
UID:one\r\n\
SUMMARY:Standup\r\n\
DTSTART:20251103T090000Z\r\n\
DTEND:20251103T091500Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:two\r\n\
SUMMARY:Planning\r\n\
DTSTART:20251103T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_a_simple_calendar() {
        let outcome = parse_all(SIMPLE);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].uid, "one");
        assert_eq!(outcome.events[1].uid, "two");
        assert_eq!(outcome.metadata.name.as_deref(), Some("Work"));
        assert_eq!(outcome.metadata.prodid.as_deref(), Some("-//Test//EN"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn identical_result_across_arbitrary_chunking() {
        for chunk_size in [1usize, 3, 7, 16, 64, 8192] {
            let mut parser = StreamingParser::new(config());
            for chunk in SIMPLE.as_bytes().chunks(chunk_size) {
                parser.push_chunk(chunk).unwrap();
            }
            let outcome = parser.finish().unwrap();
            assert_eq!(outcome.events.len(), 2, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn content_before_begin_vcalendar_is_ignored() {
        let input = format!("junk line\r\nmore junk\r\n{}", SIMPLE);
        let outcome = parse_all(&input);
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn content_after_end_vcalendar_is_ignored() {
        let input = format!("{}BEGIN:VEVENT\r\nUID:ghost\r\nEND:VEVENT\r\n", SIMPLE);
        let outcome = parse_all(&input);
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn unparseable_event_becomes_warning_not_abort() {
        let input = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:No uid here\r\n\
DTSTART:20251103T090000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:ok\r\n\
DTSTART:20251103T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let outcome = parse_all(input);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("skipped event"));
    }

    #[test]
    fn event_cap_truncates_but_keeps_consuming() {
        let mut input = String::from("BEGIN:VCALENDAR\r\n");
        for i in 0..10 {
            input.push_str(&format!(
                "BEGIN:VEVENT\r\nUID:e{}\r\nDTSTART:20251103T090000Z\r\nEND:VEVENT\r\n",
                i
            ));
        }
        input.push_str("END:VCALENDAR\r\n");

        let mut cfg = config();
        cfg.limits.max_events = 3;
        let mut parser = StreamingParser::new(cfg);
        parser.push_chunk(input.as_bytes()).unwrap();
        let outcome = parser.finish().unwrap();
        assert_eq!(outcome.events.len(), 3);
        assert!(outcome.events_truncated);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn corruption_breaker_aborts_on_repeated_tuple() {
        let mut input = String::from("BEGIN:VCALENDAR\r\n");
        for _ in 0..7 {
            input.push_str(
                "BEGIN:VEVENT\r\nUID:same\r\nDTSTART:20251103T090000Z\r\nEND:VEVENT\r\n",
            );
        }
        input.push_str("END:VCALENDAR\r\n");

        let mut cfg = config();
        cfg.limits.corruption_threshold = 3;
        let mut parser = StreamingParser::new(cfg);
        let err = parser.push_chunk(input.as_bytes()).unwrap_err();
        assert!(matches!(err, IcsError::UpstreamCorrupted { .. }));
    }

    #[test]
    fn distinct_recurrence_ids_are_not_corruption() {
        let mut input = String::from("BEGIN:VCALENDAR\r\n");
        for i in 0..7 {
            input.push_str(&format!(
                "BEGIN:VEVENT\r\nUID:same\r\nRECURRENCE-ID:2025110{}T090000Z\r\nDTSTART:2025110{}T110000Z\r\nEND:VEVENT\r\n",
                i + 1,
                i + 1
            ));
        }
        input.push_str("END:VCALENDAR\r\n");

        let mut cfg = config();
        cfg.limits.corruption_threshold = 3;
        let mut parser = StreamingParser::new(cfg);
        parser.push_chunk(input.as_bytes()).unwrap();
        let outcome = parser.finish().unwrap();
        assert_eq!(outcome.events.len(), 7);
    }

    #[test]
    fn max_input_size_is_fatal() {
        let mut cfg = config();
        cfg.limits.max_input_bytes = 64;
        let mut parser = StreamingParser::new(cfg);
        let err = parser.push_chunk(&[b'x'; 128]).unwrap_err();
        assert!(matches!(err, IcsError::InputTooLarge { .. }));
    }

    #[test]
    fn warn_size_is_a_warning_not_fatal() {
        let mut cfg = config();
        cfg.limits.warn_input_bytes = 16;
        let mut parser = StreamingParser::new(cfg);
        parser.push_chunk(SIMPLE.as_bytes()).unwrap();
        let outcome = parser.finish().unwrap();
        assert_eq!(outcome.events.len(), 2);
        assert!(outcome.warnings.iter().any(|w| w.contains("bytes")));
    }

    #[test]
    fn iteration_limit_is_fatal() {
        let mut cfg = config();
        cfg.limits.max_iterations = 4;
        let mut parser = StreamingParser::new(cfg);
        for i in 0..5 {
            let result = parser.push_chunk(b"X");
            if i < 4 {
                result.unwrap();
            } else {
                assert!(matches!(result.unwrap_err(), IcsError::IterationLimit(4)));
            }
        }
    }

    #[test]
    fn status_mapping_is_applied_at_parse_time() {
        let input = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:t\r\n\
DTSTART:20251103T090000Z\r\n\
TRANSP:TRANSPARENT\r\n\
STATUS:CONFIRMED\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let outcome = parse_all(input);
        assert_eq!(outcome.events[0].status, EventStatus::Tentative);
    }

    #[test]
    fn folded_summary_spans_chunks() {
        let input = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:f\r\nDTSTART:20251103T090000Z\r\nSUMMARY:part a\r\n  and part b\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        for chunk_size in [5usize, 11] {
            let mut parser = StreamingParser::new(config());
            for chunk in input.as_bytes().chunks(chunk_size) {
                parser.push_chunk(chunk).unwrap();
            }
            let outcome = parser.finish().unwrap();
            assert_eq!(outcome.events[0].subject, "part a and part b");
        }
    }
}
