//! Parser resource limits.
//!
//! Feeds are fetched from URLs the operator typed once and forgot; the
//! parser treats them as hostile.  All limits are per stream and
//! configurable; defaults match the documented contract.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ParserLimits {
    /// Soft ceiling: a warning is recorded once past this.
    pub warn_input_bytes: u64,
    /// Hard ceiling: the stream aborts past this.
    pub max_input_bytes: u64,
    /// Max `push_chunk` calls per stream.
    pub max_iterations: u32,
    /// Wall-clock budget per stream.
    pub time_budget: Duration,
    /// Max events emitted; further VEVENTs are consumed but dropped.
    pub max_events: usize,
    /// Abort after seeing the same (UID, RECURRENCE-ID) tuple this many
    /// times — a duplicating or mis-framed upstream.
    pub corruption_threshold: u32,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits {
            warn_input_bytes: 10 * 1024 * 1024,
            max_input_bytes: 50 * 1024 * 1024,
            max_iterations: 10_000,
            time_budget: Duration::from_secs(30),
            max_events: 1_000,
            corruption_threshold: 5,
        }
    }
}
