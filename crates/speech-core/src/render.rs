//! SSML-subset rendering with validation.
//!
//! Allowed tags: `speak`, `prosody`, `emphasis`, `break`.  Output is
//! capped at [`MAX_SSML_CHARS`] characters.  Rendering never fails loudly:
//! anything that cannot be produced within the contract returns `None` and
//! the caller serves plain speech text instead.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

/// Hard cap on rendered markup length, in characters.
pub const MAX_SSML_CHARS: usize = 500;

const ALLOWED_TAGS: &[&str] = &["speak", "prosody", "emphasis", "break"];

// ---------------------------------------------------------------------------
// Urgency
// ---------------------------------------------------------------------------

/// How soon the thing being announced happens; drives prosody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Under 5 minutes away (or already running).
    Immediate,
    /// Under 15 minutes away.
    Soon,
    Normal,
}

impl Urgency {
    /// Classify a countdown.  Negative (in progress) counts as immediate.
    pub fn from_seconds_until(seconds: i64) -> Urgency {
        if seconds < 5 * 60 {
            Urgency::Immediate
        } else if seconds < 15 * 60 {
            Urgency::Soon
        } else {
            Urgency::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders validated SSML from plain speech text.
#[derive(Debug, Clone)]
pub struct SsmlRenderer {
    max_chars: usize,
}

impl Default for SsmlRenderer {
    fn default() -> Self {
        SsmlRenderer {
            max_chars: MAX_SSML_CHARS,
        }
    }
}

impl SsmlRenderer {
    pub fn with_max_chars(max_chars: usize) -> Self {
        SsmlRenderer { max_chars }
    }

    /// Render `speech_text` with urgency-appropriate prosody.
    ///
    /// Returns `None` when the markup would exceed the length cap or fails
    /// validation — callers fall back to plain text.
    pub fn render(&self, speech_text: &str, urgency: Urgency) -> Option<String> {
        let text = speech_text.trim();
        if text.is_empty() {
            return None;
        }
        let escaped = escape(text);

        let markup = match urgency {
            Urgency::Immediate => format!(
                "<speak><prosody rate=\"110%\" pitch=\"+5%\"><emphasis level=\"strong\">{}</emphasis></prosody></speak>",
                escaped
            ),
            Urgency::Soon => format!(
                "<speak><prosody rate=\"105%\">{}</prosody></speak>",
                escaped
            ),
            Urgency::Normal => format!("<speak>{}</speak>", escaped),
        };

        self.check(&markup).then_some(markup)
    }

    /// Render a two-part announcement separated by a pause.
    pub fn render_with_pause(
        &self,
        lead: &str,
        rest: &str,
        urgency: Urgency,
    ) -> Option<String> {
        let lead = lead.trim();
        let rest = rest.trim();
        if lead.is_empty() || rest.is_empty() {
            return self.render(if lead.is_empty() { rest } else { lead }, urgency);
        }
        let markup = match urgency {
            Urgency::Immediate => format!(
                "<speak><emphasis level=\"strong\">{}</emphasis><break time=\"300ms\"/>{}</speak>",
                escape(lead),
                escape(rest)
            ),
            _ => format!(
                "<speak>{}<break time=\"300ms\"/>{}</speak>",
                escape(lead),
                escape(rest)
            ),
        };
        self.check(&markup).then_some(markup)
    }

    /// Validate externally produced markup (e.g. from a precomputed
    /// response); same contract as [`render`](Self::render).
    pub fn validate(&self, markup: &str) -> bool {
        self.check(markup)
    }

    fn check(&self, markup: &str) -> bool {
        if markup.chars().count() > self.max_chars {
            debug!(len = markup.len(), "SSML over length cap, dropping markup");
            return false;
        }
        validate_tags(markup)
    }
}

/// Well-formedness plus allowed-tag check.
fn validate_tags(markup: &str) -> bool {
    let mut reader = Reader::from_str(markup);
    let mut saw_speak = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                let name = tag.name();
                let Ok(name) = std::str::from_utf8(name.as_ref()) else {
                    return false;
                };
                if !ALLOWED_TAGS.contains(&name) {
                    debug!(tag = name, "disallowed SSML tag");
                    return false;
                }
                if name == "speak" {
                    saw_speak = true;
                }
            }
            Ok(Event::End(_)) | Ok(Event::Text(_)) => {}
            Ok(Event::Eof) => return saw_speak,
            Ok(_) => return false,
            Err(e) => {
                debug!(error = %e, "malformed SSML");
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_classification() {
        assert_eq!(Urgency::from_seconds_until(-60), Urgency::Immediate);
        assert_eq!(Urgency::from_seconds_until(4 * 60), Urgency::Immediate);
        assert_eq!(Urgency::from_seconds_until(10 * 60), Urgency::Soon);
        assert_eq!(Urgency::from_seconds_until(60 * 60), Urgency::Normal);
    }

    #[test]
    fn normal_render_wraps_in_speak() {
        let ssml = SsmlRenderer::default()
            .render("Your next meeting is at nine.", Urgency::Normal)
            .unwrap();
        assert_eq!(ssml, "<speak>Your next meeting is at nine.</speak>");
    }

    #[test]
    fn immediate_render_adds_emphasis() {
        let ssml = SsmlRenderer::default()
            .render("Standup starts in two minutes.", Urgency::Immediate)
            .unwrap();
        assert!(ssml.contains("<emphasis level=\"strong\">"));
        assert!(ssml.contains("prosody"));
    }

    #[test]
    fn text_is_xml_escaped() {
        let ssml = SsmlRenderer::default()
            .render("Q&A <review> at 3", Urgency::Normal)
            .unwrap();
        assert!(ssml.contains("Q&amp;A"));
        assert!(ssml.contains("&lt;review&gt;"));
    }

    #[test]
    fn over_length_markup_is_dropped() {
        let long = "a ".repeat(400);
        assert!(SsmlRenderer::default().render(&long, Urgency::Normal).is_none());
    }

    #[test]
    fn empty_text_renders_nothing() {
        assert!(SsmlRenderer::default().render("  ", Urgency::Normal).is_none());
    }

    #[test]
    fn pause_render_inserts_break() {
        let ssml = SsmlRenderer::default()
            .render_with_pause("Standup.", "Starts in five minutes.", Urgency::Soon)
            .unwrap();
        assert!(ssml.contains("<break time=\"300ms\"/>"));
    }

    #[test]
    fn validate_accepts_allowed_tags_only() {
        let r = SsmlRenderer::default();
        assert!(r.validate("<speak>hi<break time=\"1s\"/></speak>"));
        assert!(!r.validate("<speak><audio src=\"x\"/>hi</speak>"));
        assert!(!r.validate("<speak>unclosed"));
        assert!(!r.validate("plain text"));
    }

    #[test]
    fn custom_cap_is_honored() {
        let r = SsmlRenderer::with_max_chars(40);
        assert!(r.render("short", Urgency::Normal).is_some());
        assert!(r.render("a somewhat longer sentence here", Urgency::Normal).is_none());
    }
}
