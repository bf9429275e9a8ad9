//! Background refresh scheduler.
//!
//! One tokio task owns the whole write path: fetch → per-source pipeline →
//! post-processing → publish (smart fallback) → precompute → health.
//! Handlers never write; the scheduler never blocks a handler (the window
//! swap is atomic and the expansion workers yield).
//!
//! The first cycle runs immediately at startup; afterwards the loop
//! sleeps `REFRESH_INTERVAL` between attempts.  Cancellation finishes the
//! current stage and exits — there is no persistent state to tear.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fetch::FetchOrchestrator;
use crate::pipeline::stages::{per_source_pipeline, post_processing_pipeline};
use crate::pipeline::{Pipeline, ProcessingContext};
use crate::precompute::{self, PrecomputeStage};
use crate::state::AppState;
use crate::window::{CycleStats, PublishDecision};

pub struct RefreshScheduler {
    state: AppState,
    fetcher: Arc<FetchOrchestrator>,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(state: AppState, fetcher: Arc<FetchOrchestrator>, cancel: CancellationToken) -> Self {
        RefreshScheduler {
            state,
            fetcher,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        info!(
            sources = self.state.config.sources.len(),
            interval_secs = self.state.config.refresh_interval.as_secs(),
            "refresh scheduler started"
        );
        loop {
            self.run_cycle().await;
            self.state.health.record_heartbeat(self.state.now());

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("refresh scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(self.state.config.refresh_interval) => {}
            }
        }
    }

    /// One full refresh cycle.  Public for integration tests.
    pub async fn run_cycle(&self) {
        let state = &self.state;
        let now = state.now();
        state.health.record_attempt(now);

        let fetches = self.fetcher.fetch_all(&state.config.sources).await;

        let per_source = per_source_pipeline(
            &state.config,
            state.resolver.as_ref().clone(),
            Arc::clone(&state.expansion_workers),
        );

        let mut combined = Vec::new();
        let mut failed = 0usize;
        for fetch in fetches {
            let raw = match fetch.result {
                Ok(response) => response,
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };

            let mut ctx = source_context(state, now);
            ctx.source_url = Some(fetch.url.clone());
            ctx.raw_content = Some(raw.body);
            let outcome = per_source.run(&mut ctx).await;
            for warning in &outcome.warnings {
                warn!(source = %fetch.source_id, warning = %warning, "pipeline warning");
            }
            if outcome.success {
                combined.extend(ctx.events);
            } else {
                warn!(
                    source = %fetch.source_id,
                    stage = ?outcome.failed_stage,
                    "per-source pipeline failed"
                );
                failed += 1;
            }
        }

        let post = post_processing_pipeline(state.skipped_store());
        let mut ctx = source_context(state, now);
        ctx.events = combined;
        let outcome = post.run(&mut ctx).await;
        if !outcome.success {
            // Post-processing stages are infallible today; treat a failure
            // as a degraded cycle all the same.
            state.health.record_degraded("post-processing pipeline failed");
            return;
        }

        let stats = CycleStats {
            sources_total: state.config.sources.len(),
            sources_failed: failed,
        };
        match state.window.install(ctx.events, &stats, now) {
            PublishDecision::Published {
                version,
                event_count,
            } => {
                state.health.record_success(now, event_count as u64);
                if failed > 0 {
                    state.health.record_degraded(format!(
                        "published with {}/{} sources failed",
                        failed, stats.sources_total
                    ));
                }
                if state.config.production {
                    self.precompute(version, now).await;
                }
                state.cache.invalidate_all();
                info!(version, event_count, failed_sources = failed, "refresh complete");
            }
            PublishDecision::Preserved { reason } => {
                state.health.record_degraded(reason);
            }
        }
    }

    async fn precompute(&self, version: u64, now: chrono::DateTime<chrono::Utc>) {
        let state = &self.state;
        let pipeline = Pipeline::new(
            "precompute",
            vec![Box::new(PrecomputeStage {
                window: state.window.read(),
                default_tz: state.config.default_timezone,
                deps: state.deps.as_ref().clone(),
            })],
        );
        let mut ctx = source_context(state, now);
        let outcome = pipeline.run(&mut ctx).await;
        if !outcome.success {
            warn!("precompute pipeline failed; handlers fall back to on-demand");
            return;
        }
        if let Some(extra) = ctx.extra.get(precompute::EXTRA_KEY) {
            state
                .precomputed
                .install(precompute::from_extra(extra, version));
        }
    }
}

fn source_context(state: &AppState, now: chrono::DateTime<chrono::Utc>) -> ProcessingContext {
    ProcessingContext::new(
        now,
        state.config.expansion_days,
        state.config.event_window_size,
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
