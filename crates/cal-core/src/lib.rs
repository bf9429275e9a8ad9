// cal-core: Calendar domain logic for the chime assistant.
//
// Pure (or near-pure) building blocks consumed by the assistant service:
// clock abstraction, timezone resolution, recurrence expansion, master/
// override merging, and the next-meeting prioritizer.  Nothing in this
// crate performs I/O; the expander's only suspension point is its
// cooperative yield.

pub mod clock;
pub mod expand;
pub mod merge;
pub mod prioritize;
pub mod timezone;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use expand::{ExpandConfig, ExpandError, Expansion, expand_master};
pub use merge::{apply_overrides, dedup_events, merge_expanded};
pub use prioritize::{NextMeeting, NextMeetingCategory, PrioritizerRules, filter_upcoming, pick_next};
pub use timezone::TimezoneResolver;
