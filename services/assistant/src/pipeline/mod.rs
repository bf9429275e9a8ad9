//! Staged event processing.
//!
//! A pipeline is an ordered list of stages sharing one
//! [`ProcessingContext`].  Stages run sequentially; each returns a
//! [`StageResult`] whose `events` become the context's working set for the
//! next stage.  A failed stage halts the pipeline (later stages are
//! skipped); warnings accumulate and never halt.
//!
//! Three topologies are built in [`stages`]: per-source (parse → expand →
//! merge → dedupe → sort), post-processing (drop skipped → time window →
//! size limit) and precomputation (deposit voice answers in `extra`).

pub mod stages;

use async_trait::async_trait;
use chime_protocol::CalendarEvent;
use chrono::{DateTime, Utc};
use ics_core::CalendarMetadata;
use std::collections::HashMap;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Shared state handed from stage to stage.
#[derive(Debug)]
pub struct ProcessingContext {
    pub now: DateTime<Utc>,
    /// Lower bound of the published window (events ending before this are
    /// dropped by the time-window stage).
    pub window_start: DateTime<Utc>,
    /// Upper bound of expansion and of the published window.
    pub window_end: DateTime<Utc>,
    pub expansion_days: i64,
    pub window_size_limit: usize,
    /// Source being processed (per-source pipelines only).
    pub source_url: Option<String>,
    pub user_email: Option<String>,
    /// Raw ICS bytes for the parse stage (per-source pipelines only).
    pub raw_content: Option<Vec<u8>>,
    /// Working event set.
    pub events: Vec<CalendarEvent>,
    /// Calendar-level metadata from the parse stage.
    pub metadata: Option<CalendarMetadata>,
    /// Cross-stage handoff (e.g. precomputed responses).
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProcessingContext {
    pub fn new(now: DateTime<Utc>, expansion_days: i64, window_size_limit: usize) -> Self {
        ProcessingContext {
            now,
            window_start: now,
            window_end: now + chrono::Duration::days(expansion_days),
            expansion_days,
            window_size_limit,
            source_url: None,
            user_email: None,
            raw_content: None,
            events: Vec::new(),
            metadata: None,
            extra: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage contract
// ---------------------------------------------------------------------------

/// Result of one stage run.  `events` replaces the context's working set.
#[derive(Debug, Default)]
pub struct StageResult {
    pub success: bool,
    pub events: Vec<CalendarEvent>,
    pub events_in: usize,
    pub events_out: usize,
    pub events_filtered: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl StageResult {
    /// Successful pass-through of `events`, recording counts against
    /// `events_in`.
    pub fn ok(events_in: usize, events: Vec<CalendarEvent>) -> Self {
        let events_out = events.len();
        StageResult {
            success: true,
            events,
            events_in,
            events_out,
            events_filtered: events_in.saturating_sub(events_out),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn fail(events_in: usize, error: impl Into<String>) -> Self {
        StageResult {
            success: false,
            events: Vec::new(),
            events_in,
            events_out: 0,
            events_filtered: 0,
            warnings: Vec::new(),
            errors: vec![error.into()],
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn process(&self, ctx: &mut ProcessingContext) -> StageResult;
}

// ---------------------------------------------------------------------------
// Pipeline runner
// ---------------------------------------------------------------------------

/// Aggregate outcome of a pipeline run.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub success: bool,
    /// Stage that halted the run, when `success` is false.
    pub failed_stage: Option<&'static str>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub struct Pipeline {
    name: &'static str,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(name: &'static str, stages: Vec<Box<dyn Stage>>) -> Self {
        Pipeline { name, stages }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run all stages in order; halts at the first failure.
    pub async fn run(&self, ctx: &mut ProcessingContext) -> PipelineOutcome {
        let mut outcome = PipelineOutcome {
            success: true,
            ..PipelineOutcome::default()
        };

        for stage in &self.stages {
            let result = stage.process(ctx).await;
            debug!(
                pipeline = self.name,
                stage = stage.name(),
                events_in = result.events_in,
                events_out = result.events_out,
                filtered = result.events_filtered,
                success = result.success,
                "stage complete"
            );
            outcome.warnings.extend(result.warnings);

            if !result.success {
                warn!(
                    pipeline = self.name,
                    stage = stage.name(),
                    errors = ?result.errors,
                    "stage failed, halting pipeline"
                );
                outcome.success = false;
                outcome.failed_stage = Some(stage.name());
                outcome.errors.extend(result.errors);
                return outcome;
            }
            ctx.events = result.events;
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
