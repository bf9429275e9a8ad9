// speech-core: Speech text helpers and the SSML-subset renderer.
//
// Voice responses always carry plain `speech_text`; SSML is additive and
// must degrade to nothing rather than ship malformed markup to a speech
// engine.  The renderer therefore validates its own output and refuses to
// return anything that fails the tag-set or length contract.

pub mod render;
pub mod say;

pub use render::{MAX_SSML_CHARS, SsmlRenderer, Urgency};
pub use say::{spoken_clock_time, spoken_countdown, spoken_duration_minutes};
